//! # Swizzle Derive Macros
//!
//! Provides `#[derive(Persistable)]`, which implements `swizzle::Persistable` and the explicit
//! field layout (`swizzle::handler::Reflective`) for plain structs and enums.
//!
//! An enum is laid out as its variant index (declaration order, as `u32`) followed by the
//! fields of every variant, named `Variant.field` or `Variant.0`. Fields of inactive variants
//! are written blank. Loading an index past the last variant fails.
//!
//! Supported attributes:
//! - `#[swizzle(type_name = "...")]` on the type: overrides the persistent type name,
//!   which defaults to `module_path!()::Ident`.
//! - `#[swizzle(eager)]` on a field: references in the field are always stored again.
//! - `#[swizzle(transient)]` on a field: not persisted, loaded as `Default::default()`.
//!
//! Compatible with `syn 2.0`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Fields, Index, LitStr, Member, parse_macro_input};

/// Derives `Persistable` and `Reflective`.
#[proc_macro_derive(Persistable, attributes(swizzle))]
pub fn derive_persistable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(e) => e.to_compile_error().into(),
    }
}

struct FieldSpec {
    member: Member,
    name: String,
    ty: syn::Type,
    eager: bool,
    transient: bool,
}

enum Shape {
    Named,
    Tuple,
    Unit,
}

struct VariantSpec {
    ident: syn::Ident,
    shape: Shape,
    fields: Vec<FieldSpec>,
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream2> {
    let name = input.ident;
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Persistable cannot be derived for generic types",
        ));
    }
    let type_name = parse_container_attributes(&input.attrs)?;

    let (describe, blank) = match input.data {
        Data::Struct(data) => {
            let (shape, fields) = parse_fields(data.fields)?;
            (
                generate_describe(&name, &fields),
                generate_blank(&quote! { Self }, &fields, &shape),
            )
        }
        Data::Enum(data) => {
            if data.variants.is_empty() {
                return Err(syn::Error::new(
                    name.span(),
                    "Persistable cannot be derived for an enum without variants",
                ));
            }
            let mut variants = Vec::new();
            for variant in data.variants {
                let (shape, fields) = parse_fields(variant.fields)?;
                variants.push(VariantSpec {
                    ident: variant.ident,
                    shape,
                    fields,
                });
            }
            let first = &variants[0];
            let first_ident = &first.ident;
            (
                generate_enum_describe(&name, &variants),
                generate_blank(&quote! { Self::#first_ident }, &first.fields, &first.shape),
            )
        }
        Data::Union(_) => {
            return Err(syn::Error::new(
                name.span(),
                "Persistable cannot be derived for unions",
            ));
        }
    };

    let type_name_expr = match type_name {
        Some(literal) => quote! { ::std::string::String::from(#literal) },
        None => {
            let ident = name.to_string();
            quote! { ::swizzle::rt::qualified_name(::core::module_path!(), #ident) }
        }
    };

    Ok(quote! {
        impl ::swizzle::Persistable for #name {
            fn type_name() -> ::std::string::String {
                #type_name_expr
            }

            fn create_handler() -> ::swizzle::Result<
                ::std::sync::Arc<dyn ::swizzle::handler::TypeHandler>,
            > {
                ::swizzle::rt::derived_handler::<Self>()
            }
        }

        impl ::swizzle::rt::Reflective for #name {
            fn describe(layout: &mut ::swizzle::rt::LayoutBuilder<Self>) {
                #describe
            }

            fn blank() -> Self {
                #blank
            }
        }
    })
}

fn parse_fields(fields: Fields) -> syn::Result<(Shape, Vec<FieldSpec>)> {
    let shape = match &fields {
        Fields::Named(_) => Shape::Named,
        Fields::Unnamed(_) => Shape::Tuple,
        Fields::Unit => Shape::Unit,
    };
    let mut specs = Vec::new();
    for (index, field) in fields.into_iter().enumerate() {
        let (eager, transient) = parse_field_attributes(&field.attrs)?;
        if eager && transient {
            return Err(syn::Error::new_spanned(
                &field.ty,
                "a field cannot be both eager and transient",
            ));
        }
        let (member, name) = match field.ident {
            Some(ident) => {
                let name = ident.to_string();
                (Member::Named(ident), name)
            }
            None => (Member::Unnamed(Index::from(index)), index.to_string()),
        };
        specs.push(FieldSpec {
            member,
            name,
            ty: field.ty,
            eager,
            transient,
        });
    }
    Ok((shape, specs))
}

/// Parses `#[swizzle(type_name = "...")]` on the type.
fn parse_container_attributes(attrs: &[Attribute]) -> syn::Result<Option<LitStr>> {
    let mut type_name = None;
    for attr in attrs {
        if attr.path().is_ident("swizzle") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("type_name") {
                    type_name = Some(meta.value()?.parse::<LitStr>()?);
                    return Ok(());
                }
                Err(meta.error("Unknown swizzle attribute on a type. Supported: type_name"))
            })?;
        }
    }
    Ok(type_name)
}

/// Parses field attributes. Returns (eager, transient).
fn parse_field_attributes(attrs: &[Attribute]) -> syn::Result<(bool, bool)> {
    let mut eager = false;
    let mut transient = false;
    for attr in attrs {
        if attr.path().is_ident("swizzle") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("eager") {
                    eager = true;
                    return Ok(());
                }
                if meta.path.is_ident("transient") {
                    transient = true;
                    return Ok(());
                }
                Err(meta.error("Unknown swizzle attribute on a field. Supported: eager, transient"))
            })?;
        }
    }
    Ok((eager, transient))
}

// --- Generator: Reflective::describe ---

/// Accessors are generated as nested fn items so that they coerce to the plain fn pointers
/// `LayoutBuilder` expects. Nested items cannot name `Self`, hence the concrete type.
fn generate_describe(name: &syn::Ident, fields: &[FieldSpec]) -> TokenStream2 {
    if fields.iter().all(|f| f.transient) {
        return quote! { let _ = layout; };
    }
    let declarations = fields
        .iter()
        .enumerate()
        .filter(|(_, f)| !f.transient)
        .map(|(index, f)| {
            let get = format_ident!("__swizzle_get_{}", index);
            let get_mut = format_ident!("__swizzle_get_mut_{}", index);
            let member = &f.member;
            let ty = &f.ty;
            let label = &f.name;
            let method = if f.eager {
                quote! { eager_field }
            } else {
                quote! { field }
            };
            quote! {
                fn #get(value: &#name) -> &#ty {
                    &value.#member
                }
                fn #get_mut(value: &mut #name) -> &mut #ty {
                    &mut value.#member
                }
                layout.#method::<#ty>(#label, #get, #get_mut);
            }
        });
    quote! { #(#declarations)* }
}

// --- Generator: enum layout ---

/// The variant index comes first; it selects a blank variant before any field is applied.
fn generate_enum_describe(name: &syn::Ident, variants: &[VariantSpec]) -> TokenStream2 {
    let ordinal_arms = variants.iter().enumerate().map(|(index, v)| {
        let ident = &v.ident;
        let ordinal = index as u32;
        quote! { #name::#ident { .. } => #ordinal }
    });
    let select_arms = variants.iter().enumerate().map(|(index, v)| {
        let ordinal = index as u32;
        let ident = &v.ident;
        let value = generate_blank(&quote! { #name::#ident }, &v.fields, &v.shape);
        quote! { #ordinal => #value }
    });

    let fields = variants.iter().enumerate().flat_map(|(v_index, v)| {
        let ident = &v.ident;
        v.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.transient)
            .map(move |(f_index, f)| {
                let get = format_ident!("__swizzle_get_{}_{}", v_index, f_index);
                let get_mut = format_ident!("__swizzle_get_mut_{}_{}", v_index, f_index);
                let member = &f.member;
                let ty = &f.ty;
                let label = format!("{}.{}", ident, f.name);
                let method = if f.eager {
                    quote! { eager_variant_field }
                } else {
                    quote! { variant_field }
                };
                quote! {
                    #[allow(unreachable_patterns)]
                    fn #get(value: &#name) -> ::core::option::Option<&#ty> {
                        match value {
                            #name::#ident { #member: field, .. } => ::core::option::Option::Some(field),
                            _ => ::core::option::Option::None,
                        }
                    }
                    #[allow(unreachable_patterns)]
                    fn #get_mut(value: &mut #name) -> ::core::option::Option<&mut #ty> {
                        match value {
                            #name::#ident { #member: field, .. } => ::core::option::Option::Some(field),
                            _ => ::core::option::Option::None,
                        }
                    }
                    layout.#method::<#ty>(#label, #get, #get_mut);
                }
            })
    });

    quote! {
        fn __swizzle_ordinal(value: &#name) -> u32 {
            match value {
                #(#ordinal_arms,)*
            }
        }
        fn __swizzle_select(value: &mut #name, ordinal: u32) -> ::swizzle::Result<()> {
            *value = match ordinal {
                #(#select_arms,)*
                other => {
                    return ::core::result::Result::Err(::swizzle::rt::unknown_variant(
                        &<#name as ::swizzle::Persistable>::type_name(),
                        other,
                    ));
                }
            };
            ::core::result::Result::Ok(())
        }
        layout.discriminant(__swizzle_ordinal, __swizzle_select);
        #(#fields)*
    }
}

// --- Generator: Reflective::blank ---

fn generate_blank(path: &TokenStream2, fields: &[FieldSpec], shape: &Shape) -> TokenStream2 {
    let values = fields.iter().map(|f| {
        let ty = &f.ty;
        if f.transient {
            quote! { <#ty as ::core::default::Default>::default() }
        } else {
            quote! { ::swizzle::rt::blank_field::<#ty>() }
        }
    });
    match shape {
        Shape::Named => {
            let members = fields.iter().map(|f| &f.member);
            quote! { #path { #(#members: #values),* } }
        }
        Shape::Tuple => quote! { #path ( #(#values),* ) },
        Shape::Unit => quote! { #path },
    }
}
