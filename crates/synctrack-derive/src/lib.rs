//! Derive macros for synctrack.
//!
//! - `#[derive(Entity)]` describes a struct as a mapped table: one
//!   `FieldDef` per field, with typed accessor closures.
//! - `#[derive(SqlEnum)]` stores a fieldless enum by ordinal or, with
//!   `#[sql_enum(store_as_text)]`, by variant name.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse_macro_input, Attribute, Data, DeriveInput, Expr, Fields, Ident, Lit, LitInt, LitStr,
    Meta, Type, UnOp,
};

/// Derives `synctrack_core::schema::Entity` for a struct with named fields.
///
/// # Attributes
///
/// - `#[table(name = "Orders")]` - table name (defaults to the struct name)
///
/// # Field Attributes
///
/// - `#[column(name = "Title")]` - column name (defaults to the PascalCase
///   field name)
/// - `#[column(primary_key)]`, `#[column(autoincrement)]`
/// - `#[column(ignore)]` - not mapped
/// - `#[column(not_null)]`, `#[column(unique)]`
/// - `#[column(indexed)]` or `#[column(indexed(name = "IX", order = 1, unique))]`
/// - `#[column(max_length = 64)]`, `#[column(collation = "NOCASE")]`
/// - `#[column(flatten)]` - splices the fields of an embedded entity after
///   the struct's own fields
///
/// The struct must implement `Default`.
#[proc_macro_derive(Entity, attributes(table, column))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    derive_entity_impl(&input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

/// Derives `SqlEnum`, `FieldType` and `IntoExpr` for a fieldless enum.
///
/// Ordinals follow the explicit discriminants, counting up from the
/// previous variant otherwise. `#[sql_enum(store_as_text)]` stores the
/// variant name instead of the ordinal.
#[proc_macro_derive(SqlEnum, attributes(sql_enum))]
pub fn derive_sql_enum(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    derive_sql_enum_impl(&input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

fn derive_entity_impl(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let type_name = struct_name.to_string();
    let table_name = get_table_name(&input.attrs)?.unwrap_or_else(|| type_name.clone());

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Entity derive only supports structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Entity derive only supports structs",
            ));
        }
    };

    let mut own_fields = Vec::new();
    let mut flattened = Vec::new();
    for field in fields {
        let Some(field_name) = field.ident.as_ref() else {
            continue;
        };
        let attrs = parse_column_attrs(&field.attrs)?;
        if attrs.flatten {
            flattened.push(flatten_fields(field_name, &field.ty));
        } else {
            own_fields.push(field_def(field_name, &field.ty, &attrs));
        }
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::synctrack_core::schema::Entity for #struct_name #ty_generics #where_clause {
            fn type_name() -> &'static str {
                #type_name
            }

            fn table_name() -> &'static str {
                #table_name
            }

            fn fields() -> ::std::vec::Vec<::synctrack_core::schema::FieldDef<Self>> {
                let mut fields = ::std::vec::Vec::new();
                #(fields.push(#own_fields);)*
                #(fields.extend(#flattened);)*
                fields
            }
        }
    })
}

fn field_def(field_name: &Ident, field_type: &Type, attrs: &ColumnAttrs) -> TokenStream2 {
    let property = field_name.to_string();
    let column_name = attrs
        .name
        .clone()
        .unwrap_or_else(|| to_pascal_case(&property));

    let mut markers = Vec::new();
    if attrs.primary_key {
        markers.push(quote!(.primary_key()));
    }
    if attrs.autoincrement {
        markers.push(quote!(.autoincrement()));
    }
    if attrs.ignore {
        markers.push(quote!(.ignore()));
    }
    if attrs.not_null {
        markers.push(quote!(.not_null()));
    }
    if attrs.unique {
        markers.push(quote!(.unique()));
    }
    for index in &attrs.indices {
        let name = match &index.name {
            Some(name) => quote!(::std::option::Option::Some(#name)),
            None => quote!(::std::option::Option::None),
        };
        let order = index.order;
        let unique = index.unique;
        markers.push(quote!(.indexed(#name, #order, #unique)));
    }
    if let Some(length) = attrs.max_length {
        markers.push(quote!(.max_length(#length)));
    }
    if let Some(collation) = &attrs.collation {
        markers.push(quote!(.collation(#collation)));
    }

    quote! {
        ::synctrack_core::schema::FieldDef::<Self>::new::<#field_type>(
            #column_name,
            #property,
            |entity| &entity.#field_name,
            |entity| &mut entity.#field_name,
        )
        #(#markers)*
    }
}

fn flatten_fields(field_name: &Ident, field_type: &Type) -> TokenStream2 {
    quote! {
        <#field_type as ::synctrack_core::schema::Entity>::fields()
            .into_iter()
            .map(|field| field.flatten::<Self>(
                |entity| &entity.#field_name,
                |entity| &mut entity.#field_name,
            ))
    }
}

struct IndexAttr {
    name: Option<String>,
    order: i32,
    unique: bool,
}

#[derive(Default)]
struct ColumnAttrs {
    name: Option<String>,
    primary_key: bool,
    autoincrement: bool,
    ignore: bool,
    not_null: bool,
    unique: bool,
    flatten: bool,
    indices: Vec<IndexAttr>,
    max_length: Option<u32>,
    collation: Option<String>,
}

fn get_table_name(attrs: &[Attribute]) -> syn::Result<Option<String>> {
    let mut table_name = None;
    for attr in attrs {
        if attr.path().is_ident("table") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    let value: LitStr = meta.value()?.parse()?;
                    table_name = Some(value.value());
                    Ok(())
                } else {
                    Err(meta.error("unsupported table attribute"))
                }
            })?;
        }
    }
    Ok(table_name)
}

fn parse_column_attrs(attrs: &[Attribute]) -> syn::Result<ColumnAttrs> {
    let mut result = ColumnAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("column") {
            continue;
        }
        // Handle empty attribute like #[column]
        if matches!(attr.meta, Meta::Path(_)) {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("primary_key") {
                result.primary_key = true;
            } else if meta.path.is_ident("autoincrement") {
                result.autoincrement = true;
            } else if meta.path.is_ident("ignore") {
                result.ignore = true;
            } else if meta.path.is_ident("not_null") {
                result.not_null = true;
            } else if meta.path.is_ident("unique") {
                result.unique = true;
            } else if meta.path.is_ident("flatten") {
                result.flatten = true;
            } else if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                result.name = Some(value.value());
            } else if meta.path.is_ident("collation") {
                let value: LitStr = meta.value()?.parse()?;
                result.collation = Some(value.value());
            } else if meta.path.is_ident("max_length") {
                let value: LitInt = meta.value()?.parse()?;
                result.max_length = Some(value.base10_parse()?);
            } else if meta.path.is_ident("indexed") {
                let mut index = IndexAttr {
                    name: None,
                    order: 0,
                    unique: false,
                };
                if meta.input.peek(syn::token::Paren) {
                    meta.parse_nested_meta(|inner| {
                        if inner.path.is_ident("name") {
                            let value: LitStr = inner.value()?.parse()?;
                            index.name = Some(value.value());
                        } else if inner.path.is_ident("order") {
                            let value: LitInt = inner.value()?.parse()?;
                            index.order = value.base10_parse()?;
                        } else if inner.path.is_ident("unique") {
                            index.unique = true;
                        } else {
                            return Err(inner.error("unsupported index attribute"));
                        }
                        Ok(())
                    })?;
                }
                result.indices.push(index);
            } else {
                return Err(meta.error("unsupported column attribute"));
            }
            Ok(())
        })?;
    }

    Ok(result)
}

fn derive_sql_enum_impl(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let enum_name = &input.ident;
    let type_name = enum_name.to_string();
    let store_as_text = parse_store_as_text(&input.attrs)?;

    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            input,
            "SqlEnum derive only supports enums",
        ));
    };

    let mut labels = Vec::new();
    let mut idents = Vec::new();
    let mut ordinals = Vec::new();
    let mut next: i64 = 0;
    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(syn::Error::new_spanned(
                variant,
                "SqlEnum derive only supports fieldless variants",
            ));
        }
        let ordinal = match &variant.discriminant {
            Some((_, expr)) => discriminant_value(expr)?,
            None => next,
        };
        next = ordinal.wrapping_add(1);
        labels.push(variant.ident.to_string());
        idents.push(&variant.ident);
        ordinals.push(ordinal);
    }

    Ok(quote! {
        impl ::synctrack_core::types::SqlEnum for #enum_name {
            const INFO: &'static ::synctrack_core::types::EnumInfo =
                &::synctrack_core::types::EnumInfo {
                    type_name: #type_name,
                    store_as_text: #store_as_text,
                    variants: &[#((#labels, #ordinals)),*],
                };

            fn ordinal(&self) -> i64 {
                match self {
                    #(Self::#idents => #ordinals,)*
                }
            }

            fn from_ordinal(ordinal: i64) -> ::std::option::Option<Self> {
                match ordinal {
                    #(#ordinals => ::std::option::Option::Some(Self::#idents),)*
                    _ => ::std::option::Option::None,
                }
            }
        }

        impl ::synctrack_core::types::FieldType for #enum_name {
            fn storage_kind() -> ::synctrack_core::types::StorageKind {
                ::synctrack_core::types::StorageKind::Enum(
                    <Self as ::synctrack_core::types::SqlEnum>::INFO,
                )
            }

            fn to_value(&self) -> ::synctrack_core::types::Value {
                ::synctrack_core::types::enum_to_value(self)
            }

            fn from_value(
                value: ::synctrack_core::types::Value,
            ) -> ::synctrack_core::error::Result<Self> {
                ::synctrack_core::types::enum_from_value(value)
            }
        }

        impl ::synctrack_core::query::IntoExpr for #enum_name {
            fn into_expr(self) -> ::synctrack_core::query::Expr {
                ::synctrack_core::query::Expr::Constant(
                    ::synctrack_core::types::enum_to_value(&self),
                )
            }
        }
    })
}

fn parse_store_as_text(attrs: &[Attribute]) -> syn::Result<bool> {
    let mut store_as_text = false;
    for attr in attrs {
        if attr.path().is_ident("sql_enum") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("store_as_text") {
                    store_as_text = true;
                    Ok(())
                } else {
                    Err(meta.error("unsupported sql_enum attribute"))
                }
            })?;
        }
    }
    Ok(store_as_text)
}

fn discriminant_value(expr: &Expr) -> syn::Result<i64> {
    match expr {
        Expr::Lit(lit) => match &lit.lit {
            Lit::Int(int) => int.base10_parse(),
            _ => Err(syn::Error::new_spanned(expr, "expected an integer discriminant")),
        },
        Expr::Unary(unary) if matches!(unary.op, UnOp::Neg(_)) => {
            discriminant_value(&unary.expr).map(|value| -value)
        }
        _ => Err(syn::Error::new_spanned(expr, "expected an integer discriminant")),
    }
}

fn to_pascal_case(s: &str) -> String {
    let mut result = String::new();
    let mut capitalize_next = true;
    for c in s.chars() {
        if c == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            result.push(c.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(c);
        }
    }
    result
}
