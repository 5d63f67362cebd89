use quote::ToTokens;
use syn::punctuated::Punctuated;
use syn::{Attribute, Path, Token};

/// 把事件枚举必需的派生并入已有的 `#[derive]`
///
/// 所有 `#[derive]` 合并为第一个属性，必需项在前；
/// 同名派生只保留一次（`Serialize` 与 `serde::Serialize` 视为同一个）。
/// 无法解析的 `#[derive(...)]` 作为编译错误返回。
pub(crate) fn apply_derives(attrs: &mut Vec<Attribute>, required: Vec<Path>) -> syn::Result<()> {
    let mut derives: Vec<Path> = required;
    let mut others: Vec<Attribute> = Vec::with_capacity(attrs.len());

    for attr in attrs.drain(..) {
        if !attr.path().is_ident("derive") {
            others.push(attr);
            continue;
        }
        let listed = attr.parse_args_with(Punctuated::<Path, Token![,]>::parse_terminated)?;
        derives.extend(listed);
    }

    let mut keys = std::collections::HashSet::new();
    derives.retain(|path| keys.insert(derive_name(path)));

    attrs.push(syn::parse_quote!(#[derive(#(#derives),*)]));
    attrs.extend(others);
    Ok(())
}

fn derive_name(path: &Path) -> String {
    match path.segments.last() {
        Some(seg) => seg.ident.to_string(),
        None => path.to_token_stream().to_string(),
    }
}
