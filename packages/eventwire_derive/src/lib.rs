//! Derive macro for `eventwire::schema::Describe`
//!
//! Generates a record descriptor from a struct's named fields. Serde
//! attributes are read so the descriptor matches the serialized form:
//!
//! - `#[serde(rename = "...")]` on the container renames the record,
//!   on a field renames the field (`rename(serialize = "...")` too),
//! - `#[serde(rename_all = "...")]` on the container,
//! - `#[serde(skip)]` / `#[serde(skip_serializing)]` drop a field.
//!
//! `#[serde(flatten)]`, tuple structs, unit structs, enums and unions are
//! rejected at compile time.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse_macro_input, parse_quote, Attribute, Data, DataStruct, DeriveInput, Fields, GenericParam,
    LitStr, Token,
};

/// Derive `Describe` for a struct with named fields.
///
/// ```ignore
/// use eventwire::Describe;
///
/// #[derive(Describe, Serialize)]
/// struct Event {
///     id: String,
///     #[serde(rename = "eventName")]
///     event_name: String,
///     properties: Vec<Properties>,
/// }
/// ```
#[proc_macro_derive(Describe, attributes(serde))]
pub fn derive_describe(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand(mut input: DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;

    let fields = match &input.data {
        Data::Struct(DataStruct {
            fields: Fields::Named(fields),
            ..
        }) => &fields.named,
        Data::Struct(_) => {
            return Err(syn::Error::new_spanned(
                name,
                "Describe can only be derived for structs with named fields",
            ));
        }
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "Describe can only be derived for structs",
            ));
        }
    };

    let container = SerdeAttrs::parse(&input.attrs)?;
    if container.flatten {
        return Err(syn::Error::new_spanned(name, "flatten is not a container attribute"));
    }
    let record_name = container
        .rename
        .unwrap_or_else(|| unraw(&name.to_string()));

    let mut entries = Vec::new();
    for field in fields {
        let attrs = SerdeAttrs::parse(&field.attrs)?;
        if attrs.skip {
            continue;
        }
        if attrs.flatten {
            return Err(syn::Error::new_spanned(
                field,
                "#[serde(flatten)] is not supported by Describe",
            ));
        }

        // Named fields always carry an ident.
        let ident = match &field.ident {
            Some(ident) => ident,
            None => continue,
        };
        let field_name = match attrs.rename {
            Some(rename) => rename,
            None => {
                let declared = unraw(&ident.to_string());
                match &container.rename_all {
                    Some(rule) => rule.apply(&declared),
                    None => declared,
                }
            }
        };
        let ty = &field.ty;
        entries.push(quote! {
            .field(#field_name, <#ty as ::eventwire::schema::Describe>::describe())
        });
    }

    // Every type parameter must itself be describable.
    for param in &mut input.generics.params {
        if let GenericParam::Type(param) = param {
            param.bounds.push(parse_quote!(::eventwire::schema::Describe));
        }
    }
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::eventwire::schema::Describe for #name #ty_generics #where_clause {
            fn describe() -> ::eventwire::schema::TypeDescriptor {
                ::eventwire::schema::RecordDescriptor::new(#record_name)
                    #(#entries)*
                    .into()
            }
        }
    })
}

fn unraw(ident: &str) -> String {
    ident.strip_prefix("r#").unwrap_or(ident).to_string()
}

/// The subset of serde attributes that changes the serialized shape.
#[derive(Default)]
struct SerdeAttrs {
    rename: Option<String>,
    rename_all: Option<RenameRule>,
    skip: bool,
    flatten: bool,
}

impl SerdeAttrs {
    fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut parsed = SerdeAttrs::default();
        for attr in attrs {
            if !attr.path().is_ident("serde") {
                continue;
            }
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename") {
                    if let Some(name) = serialize_name(&meta)? {
                        parsed.rename = Some(name);
                    }
                } else if meta.path.is_ident("rename_all") {
                    if let Some(rule) = serialize_name(&meta)? {
                        parsed.rename_all = Some(RenameRule::parse(&rule).ok_or_else(|| {
                            meta.error(format!("unknown rename_all rule {:?}", rule))
                        })?);
                    }
                } else if meta.path.is_ident("skip") || meta.path.is_ident("skip_serializing") {
                    parsed.skip = true;
                } else if meta.path.is_ident("flatten") {
                    parsed.flatten = true;
                } else {
                    skip_value(&meta)?;
                }
                Ok(())
            })?;
        }
        Ok(parsed)
    }
}

/// Value of `key = "..."` or the `serialize` entry of
/// `key(serialize = "...", deserialize = "...")`.
fn serialize_name(meta: &syn::meta::ParseNestedMeta) -> syn::Result<Option<String>> {
    if meta.input.peek(Token![=]) {
        let value: LitStr = meta.value()?.parse()?;
        return Ok(Some(value.value()));
    }
    let mut name = None;
    meta.parse_nested_meta(|inner| {
        if inner.path.is_ident("serialize") {
            let value: LitStr = inner.value()?.parse()?;
            name = Some(value.value());
        } else {
            skip_value(&inner)?;
        }
        Ok(())
    })?;
    Ok(name)
}

/// Consume the value of an attribute entry we do not interpret.
fn skip_value(meta: &syn::meta::ParseNestedMeta) -> syn::Result<()> {
    if meta.input.peek(Token![=]) {
        let _: syn::Expr = meta.value()?.parse()?;
    } else if meta.input.peek(syn::token::Paren) {
        let content;
        syn::parenthesized!(content in meta.input);
        let _: TokenStream2 = content.parse()?;
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum RenameRule {
    Lower,
    Upper,
    Pascal,
    Camel,
    Snake,
    ScreamingSnake,
    Kebab,
    ScreamingKebab,
}

impl RenameRule {
    fn parse(rule: &str) -> Option<Self> {
        Some(match rule {
            "lowercase" => RenameRule::Lower,
            "UPPERCASE" => RenameRule::Upper,
            "PascalCase" => RenameRule::Pascal,
            "camelCase" => RenameRule::Camel,
            "snake_case" => RenameRule::Snake,
            "SCREAMING_SNAKE_CASE" => RenameRule::ScreamingSnake,
            "kebab-case" => RenameRule::Kebab,
            "SCREAMING-KEBAB-CASE" => RenameRule::ScreamingKebab,
            _ => return None,
        })
    }

    /// Rename a snake_case field the way serde does.
    fn apply(self, field: &str) -> String {
        match self {
            RenameRule::Lower | RenameRule::Snake => field.to_string(),
            RenameRule::Upper | RenameRule::ScreamingSnake => field.to_ascii_uppercase(),
            RenameRule::Kebab => field.replace('_', "-"),
            RenameRule::ScreamingKebab => field.to_ascii_uppercase().replace('_', "-"),
            RenameRule::Pascal | RenameRule::Camel => {
                let mut out = String::with_capacity(field.len());
                let mut capitalize = matches!(self, RenameRule::Pascal);
                for c in field.chars() {
                    if c == '_' {
                        capitalize = true;
                    } else if capitalize {
                        out.extend(c.to_uppercase());
                        capitalize = false;
                    } else {
                        out.push(c);
                    }
                }
                out
            }
        }
    }
}
