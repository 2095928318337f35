//! Provides derive macros for `green::HasDependencies`.
use quote::quote;
use syn::{Data, DataStruct, DeriveInput, Fields, FieldsNamed};

fn get_dependencies_body(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let fields = match &input.data {
        Data::Struct(DataStruct {
            fields: Fields::Named(FieldsNamed { named, .. }),
            ..
        }) => named,
        _ => {
            return Err(syn::Error::new(
                name.span(),
                "deriving HasDependencies only supports structs with named fields".to_string(),
            ));
        }
    };

    let merges: Vec<_> = fields
        .iter()
        .map(|field| {
            // UNWRAP: safe because we only support structs with named fields
            let ident = field.ident.clone().unwrap();
            quote! {
                .merge(green::HasDependencies::dependencies(&self.#ident))
            }
        })
        .collect();

    Ok(quote! {
        green::Dependencies::default()
            #(#merges)*
    })
}

/// Derives `HasDependencies` by merging the dependencies of every field.
///
/// Every field type must implement `HasDependencies`.
#[proc_macro_derive(HasDependencies)]
pub fn derive_has_dependencies(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input: DeriveInput = syn::parse_macro_input!(input);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let body = match get_dependencies_body(&input) {
        Ok(body) => body,
        Err(e) => return e.into_compile_error().into(),
    };

    let output = quote! {
        impl #impl_generics green::HasDependencies for #name #ty_generics #where_clause {
            fn dependencies(&self) -> green::Dependencies {
                #body
            }
        }
    };
    output.into()
}
