use proc_macro::TokenStream;

use quote::quote;
use syn::parse_macro_input;
use syn::{Data, DeriveInput};

/// Derive TypeName used by the ipset crate.
///
/// Each variant ident is split on its uppercase letters; the first segment is
/// the storage method and the rest are the data types, yielding the kernel
/// type name `method:datatype[,datatype[,datatype]]`. `HashIpPort` becomes
/// `hash:ip,port`, `ListSet` becomes `list:set`.
#[proc_macro_derive(TypeName)]
pub fn derive_type_name(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;
    let variants = match input.data {
        Data::Enum(data) => data.variants,
        _ => panic!("TypeName can only be derived for enums"),
    };

    let mut idents = Vec::new();
    let mut names = Vec::new();
    for variant in &variants {
        let mut splits: Vec<String> = Vec::new();
        let mut item = Vec::new();
        for c in variant.ident.to_string().chars() {
            if c.is_uppercase() && !item.is_empty() {
                splits.push(item.iter().collect());
                item.clear();
            }
            item.push(c.to_ascii_lowercase());
        }
        if !item.is_empty() {
            splits.push(item.iter().collect());
        }
        if splits.len() < 2 {
            panic!(
                "variant {} needs a method and at least one data type",
                variant.ident
            );
        }
        let type_name = format!("{}:{}", splits[0], splits[1..].join(","));
        idents.push(variant.ident.clone());
        names.push(type_name);
    }

    let ret: TokenStream = quote!(
        impl TypeName for #name {
            fn name(&self) -> &'static str {
                match self {
                    #(#name::#idents => #names,)*
                }
            }

            fn from_name(s: &str) -> Option<Self> {
                match s {
                    #(#names => Some(#name::#idents),)*
                    _ => None,
                }
            }
        }
    )
    .into();
    ret
}
