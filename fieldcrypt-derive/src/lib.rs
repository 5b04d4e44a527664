//! Derive macros for `fieldcrypt`.
//!
//! This crate provides `#[derive(Encryptable)]`, which exposes the text
//! fields of a struct to the `fieldcrypt` lifecycle hooks by name.

#![warn(clippy::pedantic, clippy::nursery)]

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse_macro_input, Attribute, Data, DeriveInput, Fields, GenericArgument, Ident, LitStr,
    PathArguments, Type,
};

/// Derive macro implementing `fieldcrypt::hooks::Encryptable`.
///
/// `String` and `Option<String>` fields are exposed as attributes named
/// after the field; other fields are not exposed. The record type defaults
/// to the struct name.
///
/// # Example
///
/// ```rust,ignore
/// use fieldcrypt_derive::Encryptable;
///
/// #[derive(Encryptable)]
/// #[crypt(record_type = "Customer")]
/// struct CustomerRow {
///     id: u64,
///     email: String,
///     #[crypt(rename = "ssn")]
///     social_security_number: Option<String>,
///     #[crypt(skip)]
///     cache_key: String,
/// }
/// ```
#[proc_macro_derive(Encryptable, attributes(crypt))]
pub fn derive_encryptable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input).unwrap_or_else(syn::Error::into_compile_error).into()
}

enum FieldKind {
    Text,
    OptionalText,
}

struct ExposedField<'a> {
    ident: &'a Ident,
    name: String,
    kind: FieldKind,
}

#[derive(Default)]
struct FieldOptions {
    skip: bool,
    rename: Option<String>,
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "Encryptable can only be derived for structs",
        ));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "Encryptable requires a struct with named fields",
        ));
    };

    let record_type = record_type(&input.attrs)?.unwrap_or_else(|| input.ident.to_string());

    let mut exposed = Vec::new();
    for field in &fields.named {
        let options = field_options(&field.attrs)?;
        let (Some(ident), false) = (field.ident.as_ref(), options.skip) else {
            continue;
        };
        let Some(kind) = field_kind(&field.ty) else {
            continue;
        };
        let name = options.rename.unwrap_or_else(|| ident.to_string());
        exposed.push(ExposedField { ident, name, kind });
    }

    let inserts = exposed.iter().map(|field| {
        let ident = field.ident;
        let name = &field.name;
        match field.kind {
            FieldKind::Text => quote! {
                attributes.insert(
                    ::std::string::String::from(#name),
                    ::fieldcrypt::store::Value::String(::std::clone::Clone::clone(&self.#ident)),
                );
            },
            FieldKind::OptionalText => quote! {
                attributes.insert(
                    ::std::string::String::from(#name),
                    ::std::clone::Clone::clone(&self.#ident).map_or(
                        ::fieldcrypt::store::Value::Null,
                        ::fieldcrypt::store::Value::String,
                    ),
                );
            },
        }
    });

    let arms = exposed.iter().map(|field| {
        let ident = field.ident;
        let name = &field.name;
        match field.kind {
            FieldKind::Text => quote! {
                #name => match value {
                    ::fieldcrypt::store::Value::String(text) => self.#ident = text,
                    ::fieldcrypt::store::Value::Null => self.#ident = ::std::string::String::new(),
                    _ => {}
                },
            },
            FieldKind::OptionalText => quote! {
                #name => match value {
                    ::fieldcrypt::store::Value::String(text) => {
                        self.#ident = ::std::option::Option::Some(text);
                    }
                    ::fieldcrypt::store::Value::Null => self.#ident = ::std::option::Option::None,
                    _ => {}
                },
            },
        }
    });

    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::fieldcrypt::hooks::Encryptable for #ident #ty_generics #where_clause {
            const RECORD_TYPE: &'static str = #record_type;

            fn extract_attributes(&self) -> ::fieldcrypt::store::AttributeMap {
                #[allow(unused_mut)]
                let mut attributes = ::fieldcrypt::store::AttributeMap::new();
                #(#inserts)*
                attributes
            }

            #[allow(unused_variables)]
            fn apply_attributes(&mut self, attributes: ::fieldcrypt::store::AttributeMap) {
                for (name, value) in attributes {
                    match name.as_str() {
                        #(#arms)*
                        _ => {}
                    }
                }
            }
        }
    })
}

fn record_type(attrs: &[Attribute]) -> syn::Result<Option<String>> {
    let mut record_type = None;
    for attr in attrs.iter().filter(|a| a.path().is_ident("crypt")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("record_type") {
                let value: LitStr = meta.value()?.parse()?;
                record_type = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unsupported crypt attribute, expected `record_type`"))
            }
        })?;
    }
    Ok(record_type)
}

fn field_options(attrs: &[Attribute]) -> syn::Result<FieldOptions> {
    let mut options = FieldOptions::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("crypt")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                options.skip = true;
                Ok(())
            } else if meta.path.is_ident("rename") {
                let value: LitStr = meta.value()?.parse()?;
                options.rename = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unsupported crypt attribute, expected `skip` or `rename`"))
            }
        })?;
    }
    Ok(options)
}

fn field_kind(ty: &Type) -> Option<FieldKind> {
    if is_string(ty) {
        return Some(FieldKind::Text);
    }
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first() {
        Some(GenericArgument::Type(inner)) if args.args.len() == 1 && is_string(inner) => {
            Some(FieldKind::OptionalText)
        }
        _ => None,
    }
}

fn is_string(ty: &Type) -> bool {
    match ty {
        Type::Path(path) if path.qself.is_none() => path
            .path
            .segments
            .last()
            .is_some_and(|segment| segment.ident == "String" && segment.arguments.is_empty()),
        _ => false,
    }
}
