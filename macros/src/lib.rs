extern crate proc_macro;
use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, parse_macro_input};

/// Derives the storage `Encode` trait for structs with named fields and for
/// enums. Struct fields are appended in declaration order; enum variants are
/// tagged with their index as a single leading byte.
#[proc_macro_derive(Encode)]
pub fn encode_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;

    let encode_impl = match input.data {
        Data::Struct(data) => {
            let fields = match data.fields {
                Fields::Named(fields) => fields.named,
                _ => {
                    return syn::Error::new_spanned(
                        name,
                        "Encode requires a struct with named fields",
                    )
                    .to_compile_error()
                    .into();
                }
            };

            let appends = fields.iter().map(|f| {
                let field_name = &f.ident;
                quote! {
                    builder = builder.append(&self.#field_name);
                }
            });

            quote! {
                impl crate::store::encdec::Encode for #name {
                    fn encode(&self) -> Vec<u8> {
                        let mut builder = crate::store::encdec::EncodeBuilder::new();

                        #(#appends)*

                        builder.build()
                    }
                }
            }
        }
        Data::Enum(data_enum) => {
            let arms = data_enum.variants.iter().enumerate().map(|(index, variant)| {
                let variant_name = &variant.ident;
                let tag = index as u8;

                match &variant.fields {
                    Fields::Unit => quote! {
                        Self::#variant_name => vec![#tag]
                    },
                    Fields::Unnamed(fields) => {
                        let bindings: Vec<_> = (0..fields.unnamed.len())
                            .map(|i| format_ident!("field{}", i))
                            .collect();

                        quote! {
                            Self::#variant_name(#(#bindings),*) => {
                                vec![vec![#tag], #(#bindings.encode()),*].concat()
                            }
                        }
                    }
                    Fields::Named(fields) => {
                        let bindings: Vec<_> = fields
                            .named
                            .iter()
                            .map(|f| f.ident.as_ref().unwrap())
                            .collect();

                        quote! {
                            Self::#variant_name { #(#bindings),* } => {
                                vec![vec![#tag], #(#bindings.encode()),*].concat()
                            }
                        }
                    }
                }
            });

            quote! {
                impl crate::store::encdec::Encode for #name {
                    fn encode(&self) -> Vec<u8> {
                        match self {
                            #(#arms),*
                        }
                    }
                }
            }
        }
        _ => {
            return syn::Error::new_spanned(name, "Encode only supports structs and enums")
                .to_compile_error()
                .into();
        }
    };

    encode_impl.into()
}

/// Derives the storage `Decode` trait, the inverse of `Encode`.
#[proc_macro_derive(Decode)]
pub fn decode_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;

    let decode_impl = match input.data {
        Data::Struct(data) => {
            let fields = match data.fields {
                Fields::Named(fields) => fields.named,
                _ => {
                    return syn::Error::new_spanned(
                        &name,
                        "Decode requires a struct with named fields",
                    )
                    .to_compile_error()
                    .into();
                }
            };

            let field_names: Vec<_> = fields.iter().map(|f| &f.ident).collect();
            let field_decodes = fields.iter().map(|f| {
                let field_name = &f.ident;
                let field_ty = &f.ty;

                quote! {
                    let (#field_name, rest) =
                        <#field_ty as crate::store::encdec::Decode>::decode(bytes)?;
                    bytes = rest;
                }
            });

            quote! {
                impl crate::store::encdec::Decode for #name {
                    fn decode(bytes: &[u8]) -> crate::DecodingResult<Self> {
                        let mut bytes = bytes;

                        #(#field_decodes)*

                        Ok((Self { #(#field_names: #field_names),* }, bytes))
                    }
                }
            }
        }
        Data::Enum(data_enum) => {
            let arms = data_enum.variants.iter().enumerate().map(|(index, variant)| {
                let variant_name = &variant.ident;
                let tag = index as u8;

                match &variant.fields {
                    Fields::Unit => quote! {
                        #tag => Ok((Self::#variant_name, bytes))
                    },
                    Fields::Unnamed(fields) => {
                        let bindings: Vec<_> = (0..fields.unnamed.len())
                            .map(|i| format_ident!("field{}", i))
                            .collect();

                        let field_decodes = fields.unnamed.iter().zip(&bindings).map(|(f, b)| {
                            let field_ty = &f.ty;
                            quote! {
                                let (#b, bytes) =
                                    <#field_ty as crate::store::encdec::Decode>::decode(bytes)?;
                            }
                        });

                        quote! {
                            #tag => {
                                #(#field_decodes)*
                                Ok((Self::#variant_name(#(#bindings),*), bytes))
                            }
                        }
                    }
                    Fields::Named(fields) => {
                        let bindings: Vec<_> = fields
                            .named
                            .iter()
                            .map(|f| f.ident.as_ref().unwrap())
                            .collect();

                        let field_decodes = fields.named.iter().map(|f| {
                            let field_ty = &f.ty;
                            let field_name = &f.ident;
                            quote! {
                                let (#field_name, bytes) =
                                    <#field_ty as crate::store::encdec::Decode>::decode(bytes)?;
                            }
                        });

                        quote! {
                            #tag => {
                                #(#field_decodes)*
                                Ok((Self::#variant_name { #(#bindings),* }, bytes))
                            }
                        }
                    }
                }
            });

            quote! {
                impl crate::store::encdec::Decode for #name {
                    fn decode(bytes: &[u8]) -> crate::DecodingResult<Self> {
                        if bytes.is_empty() {
                            return Err(crate::DecodingError::MalformedInput(
                                "enum insufficient bytes".to_string(),
                                bytes.to_vec(),
                            ));
                        }

                        let kind = bytes[0];
                        let bytes = &bytes[1..];
                        match kind {
                            #(#arms)*
                            _ => Err(crate::DecodingError::InvalidEnumKind(bytes.to_vec())),
                        }
                    }
                }
            }
        }
        _ => {
            return syn::Error::new_spanned(name, "Decode only supports structs and enums")
                .to_compile_error()
                .into();
        }
    };

    decode_impl.into()
}
