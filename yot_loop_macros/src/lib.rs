use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{FnArg, ItemFn, parse_macro_input, spanned::Spanned};

/// Runs an async `main` on a fresh event loop.
///
/// The function takes the loop's `Handle` as its only argument. The loop runs
/// until it reaches quiescence, not merely until `main` returns.
///
/// ```ignore
/// #[yot_loop::main]
/// async fn main(handle: yot_loop::Handle) {
///     handle.sleep(std::time::Duration::from_secs(1)).await;
/// }
/// ```
#[proc_macro_attribute]
pub fn main(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    expand(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand(input: ItemFn) -> syn::Result<TokenStream2> {
    let sig = &input.sig;
    let body = &input.block;
    let attrs = &input.attrs;
    let vis = &input.vis;

    if sig.asyncness.is_none() {
        return Err(error(sig.fn_token.span(), "#[yot_loop::main] function must be async"));
    }
    if sig.ident != "main" {
        return Err(error(
            sig.ident.span(),
            "#[yot_loop::main] can only be applied to the `main` function",
        ));
    }
    let handle_pat = match sig.inputs.first() {
        Some(FnArg::Typed(arg)) if sig.inputs.len() == 1 => &arg.pat,
        _ => {
            return Err(error(
                sig.inputs.span(),
                "#[yot_loop::main] expects exactly one argument: `handle: yot_loop::Handle`",
            ));
        }
    };

    Ok(quote! {
        #(#attrs)*
        #vis fn main() {
            let event_loop = ::yot_loop::Builder::from_env()
                .map_err(::yot_loop::BuildError::from)
                .and_then(::yot_loop::Builder::build)
                .expect("failed to initialize the event loop");
            let handle = event_loop.handle();
            event_loop.add_task(async move {
                let #handle_pat: ::yot_loop::Handle = handle;
                #body
            });
            event_loop.run();
        }
    })
}

fn error(span: Span, message: &str) -> syn::Error {
    syn::Error::new(span, message)
}
