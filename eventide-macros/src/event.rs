use crate::utils::apply_derives;
use proc_macro::TokenStream;
use quote::quote;
use std::collections::HashMap;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Expr, Ident, Item, Result, Token, parse::Parse, parse::ParseStream, parse_macro_input};

/// #[event] 宏实现
/// - 每个变体即一种已登记的事件种类，支持具名、元组与单元变体
/// - 生成 `::eventide_domain::domain_event::DomainEvent` 实现（EVENT_TYPES / event_type）
/// - 默认名称为 `枚举名.变体名`；`#[event(namespace = "...")]` 改为 `namespace.变体名`
/// - 变体可覆写：`#[event(event_type = "...")]`
/// - 规范名称在枚举内必须唯一
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let cfg = parse_macro_input!(attr as EventAttrConfig);
    let mut input = parse_macro_input!(item as Item);

    let enum_item = match &mut input {
        Item::Enum(e) => e,
        other => {
            return syn::Error::new(other.span(), "#[event] can only be used on enum types")
                .to_compile_error()
                .into();
        }
    };

    if enum_item.variants.is_empty() {
        return syn::Error::new(
            enum_item.ident.span(),
            "#[event] requires at least one variant",
        )
        .to_compile_error()
        .into();
    }

    // 合并/追加默认派生：Debug, Clone, PartialEq, Serialize, Deserialize
    let required: Vec<syn::Path> = vec![
        syn::parse_quote!(Debug),
        syn::parse_quote!(Clone),
        syn::parse_quote!(PartialEq),
        syn::parse_quote!(serde::Serialize),
        syn::parse_quote!(serde::Deserialize),
    ];
    if let Err(err) = apply_derives(&mut enum_item.attrs, required) {
        return err.to_compile_error().into();
    }

    let prefix = cfg
        .namespace
        .map(|lit| lit.value())
        .unwrap_or_else(|| enum_item.ident.to_string());

    // 变体 -> 规范名称
    let mut names: Vec<(Ident, syn::LitStr)> = Vec::new();
    let mut seen: HashMap<String, Ident> = HashMap::new();

    for v in &mut enum_item.variants {
        let mut retained_attrs = Vec::new();
        let mut type_lit: Option<syn::LitStr> = None;

        for attr in v.attrs.iter() {
            if attr.path().is_ident("event") {
                match parse_variant_event_attr(attr) {
                    Ok(lit) => {
                        if type_lit.is_some() {
                            return syn::Error::new(
                                attr.span(),
                                "duplicate 'event_type' specified for this variant",
                            )
                            .to_compile_error()
                            .into();
                        }
                        type_lit = Some(lit);
                    }
                    Err(err) => return err.to_compile_error().into(),
                }
            } else {
                retained_attrs.push(attr.clone());
            }
        }
        v.attrs = retained_attrs;

        let lit = type_lit.unwrap_or_else(|| {
            syn::LitStr::new(&format!("{}.{}", prefix, v.ident), v.ident.span())
        });

        if lit.value().is_empty() {
            return syn::Error::new(lit.span(), "event_type must not be empty")
                .to_compile_error()
                .into();
        }
        if let Some(prev) = seen.insert(lit.value(), v.ident.clone()) {
            return syn::Error::new(
                lit.span(),
                format!(
                    "event type {:?} is already used by variant `{}`",
                    lit.value(),
                    prev
                ),
            )
            .to_compile_error()
            .into();
        }
        names.push((v.ident.clone(), lit));
    }

    // 生成 DomainEvent 实现
    let enum_ident = &enum_item.ident;
    let (impl_generics, ty_generics, where_clause) = enum_item.generics.split_for_impl();

    let all_names = names.iter().map(|(_, lit)| lit);
    let type_match_arms = names.iter().map(|(v_ident, lit)| {
        quote! { Self::#v_ident { .. } => #lit }
    });

    let out = quote! {
        #enum_item

        impl #impl_generics ::eventide_domain::domain_event::DomainEvent for #enum_ident #ty_generics #where_clause {
            const EVENT_TYPES: &'static [&'static str] = &[ #( #all_names ),* ];

            fn event_type(&self) -> &'static str {
                match self { #( #type_match_arms, )* }
            }
        }
    };

    TokenStream::from(out)
}

// -------- utils & parsing --------

fn parse_variant_event_attr(attr: &syn::Attribute) -> Result<syn::LitStr> {
    match &attr.meta {
        syn::Meta::List(_) => {
            let mut ty: Option<syn::LitStr> = None;
            let pairs: Punctuated<KeyValue, Token![,]> =
                attr.parse_args_with(Punctuated::<KeyValue, Token![,]>::parse_terminated)?;

            for kv in pairs {
                match kv.key.to_string().as_str() {
                    "event_type" => {
                        if ty.is_some() {
                            return Err(syn::Error::new(
                                kv.key.span(),
                                "duplicate key 'event_type' in attribute",
                            ));
                        }
                        ty = Some(expect_str_lit(kv.value, "event_type")?);
                    }
                    _ => {
                        return Err(syn::Error::new(
                            kv.key.span(),
                            "unknown key; expected 'event_type'",
                        ));
                    }
                }
            }

            ty.ok_or_else(|| syn::Error::new(attr.span(), "expected #[event(event_type = \"...\")]"))
        }
        other => Err(syn::Error::new(
            other.span(),
            "expected #[event(event_type = \"...\")]",
        )),
    }
}

fn expect_str_lit(value: Expr, key: &str) -> Result<syn::LitStr> {
    match value {
        Expr::Lit(syn::ExprLit {
            lit: syn::Lit::Str(lit),
            ..
        }) => Ok(lit),
        other => Err(syn::Error::new(
            other.span(),
            format!("expected string literal for '{key}'"),
        )),
    }
}

struct KeyValue {
    key: Ident,
    value: Expr,
}

impl Parse for KeyValue {
    fn parse(input: ParseStream) -> Result<Self> {
        let key = input.parse()?;
        input.parse::<Token![=]>()?;
        let value = input.parse()?;
        Ok(Self { key, value })
    }
}

// 枚举级配置：名称前缀
struct EventAttrConfig {
    namespace: Option<syn::LitStr>,
}

impl Parse for EventAttrConfig {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut namespace: Option<syn::LitStr> = None;

        let pairs: Punctuated<KeyValue, Token![,]> =
            Punctuated::<KeyValue, Token![,]>::parse_terminated(input)?;

        for kv in pairs {
            match kv.key.to_string().as_str() {
                "namespace" => {
                    if namespace.is_some() {
                        return Err(syn::Error::new(
                            kv.key.span(),
                            "duplicate key 'namespace' in attribute",
                        ));
                    }
                    namespace = Some(expect_str_lit(kv.value, "namespace")?);
                }
                _ => {
                    return Err(syn::Error::new(
                        kv.key.span(),
                        "unknown key; expected 'namespace'",
                    ));
                }
            }
        }

        Ok(Self { namespace })
    }
}
