//! Procedural macros for TAP testing in xbee-sensor-node.
//!
//! Provides `#[tap_test]`, which registers a function with the TAP runner in
//! `xbee_sensor_node::testing` so the same test can run on the host or on the
//! node itself through the `device-tests` binary.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Expr, ExprLit, ItemFn, Lit, Meta, ReturnType};

/// Mark a function as a TAP test.
///
/// Supported forms:
///
/// - `#[tap_test]`
/// - `#[tap_test(should_panic)]`
/// - `#[tap_test(should_panic = "expected message")]`
///
/// A test either returns `()` (a panic is a failure) or a `Result` whose
/// `Err` is reported as a failure.
///
/// ```ignore
/// use xbee_sensor_node_macros::tap_test;
///
/// #[tap_test]
/// fn table_yields_offsets() {
///     let table = WakeTable::new(vec![0, 5, 13, 20]).unwrap();
///     assert_eq!(table.next_offset_secs(), 5);
/// }
/// ```
#[proc_macro_attribute]
pub fn tap_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = parse_macro_input!(item as ItemFn);

    let fn_name = &input_fn.sig.ident;
    let fn_name_str = fn_name.to_string();
    let fn_block = &input_fn.block;
    let fn_vis = &input_fn.vis;
    let fn_attrs = &input_fn.attrs;
    let fn_output = &input_fn.sig.output;
    let returns_result = matches!(fn_output, ReturnType::Type(_, _));

    let register_call = match parse_expectation(attr) {
        Expectation::Pass if returns_result => quote! {
            runner.run(#fn_name_str, #fn_name);
        },
        Expectation::Pass => quote! {
            runner.run_assert(#fn_name_str, #fn_name);
        },
        Expectation::Panic(None) => quote! {
            runner.run_should_panic(#fn_name_str, #fn_name, None);
        },
        Expectation::Panic(Some(msg)) => quote! {
            runner.run_should_panic(#fn_name_str, #fn_name, Some(#msg));
        },
    };

    let expanded = quote! {
        #(#fn_attrs)*
        #fn_vis fn #fn_name() #fn_output #fn_block

        ::inventory::submit! {
            ::xbee_sensor_node::testing::TapTestEntry::new(
                #fn_name_str,
                |runner: &mut ::xbee_sensor_node::testing::TestRunner| {
                    #register_call
                }
            )
        }
    };

    TokenStream::from(expanded)
}

enum Expectation {
    Pass,
    Panic(Option<String>),
}

fn parse_expectation(attr: TokenStream) -> Expectation {
    if attr.is_empty() {
        return Expectation::Pass;
    }

    let meta: Meta = match syn::parse(attr) {
        Ok(meta) => meta,
        Err(e) => panic!("tap_test: cannot parse attribute: {}", e),
    };

    match meta {
        Meta::Path(path) if path.is_ident("should_panic") => Expectation::Panic(None),
        Meta::NameValue(nv) if nv.path.is_ident("should_panic") => match nv.value {
            Expr::Lit(ExprLit {
                lit: Lit::Str(s), ..
            }) => Expectation::Panic(Some(s.value())),
            _ => panic!(
                "tap_test: should_panic expects a string literal, \
                 e.g. #[tap_test(should_panic = \"expected message\")]"
            ),
        },
        _ => panic!(
            "tap_test: unsupported attribute. Use #[tap_test], #[tap_test(should_panic)] \
             or #[tap_test(should_panic = \"message\")]"
        ),
    }
}
