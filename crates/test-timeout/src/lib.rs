//! `#[tokio_timeout_test]`: an async test that fails instead of hanging.
//!
//! The test body runs on its own thread, on a fresh current-thread runtime
//! wrapped in `tokio::time::timeout`. The test thread waits with `recv_timeout`,
//! so a body that blocks without yielding still fails on time. The default
//! budget is 10 seconds; pass an integer to override it, e.g.
//! `#[tokio_timeout_test(3)]`.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = if attr.is_empty() {
        DEFAULT_TIMEOUT_SECS
    } else {
        let lit = parse_macro_input!(attr as LitInt);
        match lit.base10_parse::<u64>() {
            Ok(0) => {
                return syn::Error::new_spanned(&lit, "timeout must be greater than zero")
                    .to_compile_error()
                    .into()
            }
            Ok(value) => value,
            Err(err) => return err.to_compile_error().into(),
        }
    };

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.take().is_none() {
        return syn::Error::new_spanned(
            &sig.fn_token,
            "tokio_timeout_test expects an async fn",
        )
        .to_compile_error()
        .into();
    }

    let attrs: Vec<Attribute> = attrs.into_iter().filter(|a| !is_test_attr(a)).collect();
    let name = sig.ident.to_string();

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let budget = std::time::Duration::from_secs(#secs);
            let (done_tx, done_rx) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .expect("build test runtime");
                    runtime.block_on(async move {
                        match tokio::time::timeout(budget, async move #block).await {
                            Ok(output) => output,
                            Err(_) => panic!("test `{}` exceeded {}s", #name, #secs),
                        }
                    })
                }));
                let _ = done_tx.send(outcome);
            });
            match done_rx.recv_timeout(budget) {
                Ok(Ok(output)) => output,
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test `{}` exceeded {}s", #name, #secs)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test `{}` thread exited without a result", #name)
                }
            }
        }
    })
}

/// Drops `#[test]` and `#[tokio::test]` so the generated harness attribute is the only one.
fn is_test_attr(attr: &Attribute) -> bool {
    let path = attr.path();
    path.is_ident("test")
        || (path.segments.len() == 2
            && path.segments[0].ident == "tokio"
            && path.segments[1].ident == "test")
}
