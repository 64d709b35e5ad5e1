use proc_macro::TokenStream;
use proc_macro2::Ident;
use quote::quote;
use std::mem::replace;

use syn::parse::{Parse, ParseStream};
use syn::spanned::Spanned;
use syn::{parse_macro_input, parse_quote, Block, Error, Expr, ItemFn, Result, Token};

const OPTIONS: [&str; 3] = ["event_interval", "deadlock_detection", "seed"];

/// Runs an `async fn main` on a fresh warren runtime.
///
/// Configuration options are forwarded to `warren::runtime::Config`:
/// ```ignore
/// #[warren::main(seed = 7, event_interval = 31)]
/// async fn main() {}
/// ```
#[proc_macro_attribute]
pub fn main(args: TokenStream, input: TokenStream) -> TokenStream {
    let args = parse_macro_input!(args as Args);
    let AsyncFn { item } = parse_macro_input!(input);
    let item = transform(item, &args);
    quote!(#item).into()
}

/// Runs an `async fn` test on a fresh warren runtime.
/// Accepts the same options as [`macro@main`].
#[proc_macro_attribute]
pub fn test(args: TokenStream, input: TokenStream) -> TokenStream {
    let args = parse_macro_input!(args as Args);
    let AsyncFn { item } = parse_macro_input!(input);
    let item = transform(item, &args);
    quote!(#[test] #item).into()
}

fn transform(mut item: ItemFn, args: &Args) -> ItemFn {
    let block = item.block.clone();
    let names = args.options.iter().map(|(name, _)| name);
    let values = args.options.iter().map(|(_, value)| value);
    let new_block: Block = parse_quote!({
        let config = warren::runtime::Config::default() #(.#names(#values))*;
        warren::runtime::Runtime::with_config(config)
            .block_on(async move #block)
            .unwrap()
    });
    let _ = replace(&mut item.block, Box::new(new_block));
    item.sig.asyncness = None;
    item
}

struct AsyncFn {
    item: ItemFn,
}

#[derive(Default)]
struct Args {
    options: Vec<(Ident, Expr)>,
}

impl Parse for Args {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut args = Args::default();
        while !input.is_empty() {
            let ident: Ident = input.parse()?;
            let _: Token![=] = input.parse()?;
            let expr: Expr = input.parse()?;
            if !OPTIONS.iter().any(|option| ident == option) {
                return Err(Error::new(
                    ident.span(),
                    format!(
                        "unknown argument \"{ident}\". Supported arguments are: `event_interval`, `deadlock_detection` and `seed`."
                    ),
                ));
            }
            if args.options.iter().any(|(name, _)| *name == ident) {
                return Err(Error::new(
                    ident.span(),
                    format!("argument `{ident}` is defined multiple times"),
                ));
            }
            args.options.push((ident, expr));
            let Ok(_): Result<Token![,]> = input.parse() else {
                break;
            };
        }

        if !input.is_empty() {
            return Err(input.error("expected end of input"));
        }

        Ok(args)
    }
}

impl Parse for AsyncFn {
    fn parse(input: ParseStream) -> Result<Self> {
        let item: ItemFn = input.parse()?;
        let is_async = item.sig.asyncness.is_some();
        if !is_async {
            return Err({
                Error::new(
                    item.sig.span(),
                    "expected an `async fn`. help: make this function `async`.",
                )
            });
        }
        Ok(AsyncFn { item })
    }
}
