use proc_macro2::{Span, TokenStream};
use quote::{quote, quote_spanned};
use syn::parse::Parser;

use crate::parse::*;

// syn::AttributeArgs does not implement syn::Parse
type AttributeArgs = syn::punctuated::Punctuated<syn::Meta, syn::Token![,]>;

const KNOWN_OPTIONS: &str = "`worker_threads`, `max_events`";

#[derive(Default)]
struct FinalConfig {
    worker_threads: Option<usize>,
    max_events: Option<usize>,
}

struct ConfigBuilder {
    worker_threads: Option<usize>,
    max_events: Option<usize>,
}

impl ConfigBuilder {
    fn new() -> Self {
        ConfigBuilder {
            worker_threads: None,
            max_events: None,
        }
    }

    fn set_positive(
        slot: &mut Option<usize>,
        lit: &syn::Lit,
        span: Span,
        field: &str,
    ) -> Result<(), syn::Error> {
        if slot.is_some() {
            return Err(syn::Error::new(span, format!("`{field}` set multiple times.")));
        }

        let val = parse_int(lit, span, field)?;
        if val == 0 {
            return Err(syn::Error::new(span, format!("`{field}` may not be 0.")));
        }

        *slot = Some(val);
        Ok(())
    }

    fn build(self) -> FinalConfig {
        FinalConfig {
            worker_threads: self.worker_threads,
            max_events: self.max_events,
        }
    }
}

/// Expands
///
/// ```no_compile
/// #[evbus::main(worker_threads = 2)]
/// async fn main() -> anyhow::Result<()> { .. }
/// ```
///
/// into a synchronous `main` that builds a `Reactor` on the current thread and
/// blocks on the body.
pub(crate) fn main(args: TokenStream, item: TokenStream) -> TokenStream {
    // On error, still expand to something close to the expected output so
    // IDE completions keep working.
    let input: ItemFn = match syn::parse2(item.clone()) {
        Ok(it) => it,
        Err(e) => return token_stream_with_error(item, e),
    };

    let config = if input.sig.ident == "main" && !input.sig.inputs.is_empty() {
        let msg = "the main function cannot accept arguments";
        Err(syn::Error::new_spanned(&input.sig.ident, msg))
    } else {
        AttributeArgs::parse_terminated
            .parse2(args)
            .and_then(|args| build_config(&input, args, "evbus::main"))
    };

    match config {
        Ok(config) => parse_knobs(input, false, config),
        Err(e) => token_stream_with_error(parse_knobs(input, false, FinalConfig::default()), e),
    }
}

pub(crate) fn test(args: TokenStream, item: TokenStream) -> TokenStream {
    let input: ItemFn = match syn::parse2(item.clone()) {
        Ok(it) => it,
        Err(e) => return token_stream_with_error(item, e),
    };

    let config = if let Some(attr) = input.attrs().find(|attr| is_test_attribute(attr)) {
        let msg = "second test attribute is supplied, consider removing or changing the order of your test attributes";
        Err(syn::Error::new_spanned(attr, msg))
    } else if !input.sig.inputs.is_empty() {
        let msg = "test functions cannot accept arguments";
        Err(syn::Error::new_spanned(&input.sig.inputs, msg))
    } else {
        AttributeArgs::parse_terminated
            .parse2(args)
            .and_then(|args| build_config(&input, args, "evbus::test"))
    };

    match config {
        Ok(config) => parse_knobs(input, true, config),
        Err(e) => token_stream_with_error(parse_knobs(input, true, FinalConfig::default()), e),
    }
}

fn build_config(
    input: &ItemFn,
    args: AttributeArgs,
    macro_name: &str,
) -> Result<FinalConfig, syn::Error> {
    if input.sig.asyncness.is_none() {
        let msg = "the `async` keyword is missing from the function declaration";
        return Err(syn::Error::new_spanned(input.sig.fn_token, msg));
    }

    let mut config = ConfigBuilder::new();

    for arg in args {
        match arg {
            syn::Meta::NameValue(namevalue) => {
                let ident = namevalue
                    .path
                    .get_ident()
                    .ok_or_else(|| {
                        syn::Error::new_spanned(&namevalue, "Must have specified ident")
                    })?
                    .to_string()
                    .to_lowercase();
                let lit = match &namevalue.value {
                    syn::Expr::Lit(syn::ExprLit { lit, .. }) => lit,
                    expr => return Err(syn::Error::new_spanned(expr, "Must be a literal")),
                };
                let span = syn::spanned::Spanned::span(lit);

                match ident.as_str() {
                    "worker_threads" => ConfigBuilder::set_positive(
                        &mut config.worker_threads,
                        lit,
                        span,
                        "worker_threads",
                    )?,
                    "max_events" => ConfigBuilder::set_positive(
                        &mut config.max_events,
                        lit,
                        span,
                        "max_events",
                    )?,
                    name => {
                        let msg = format!(
                            "Unknown attribute {name} is specified; expected one of: {KNOWN_OPTIONS}",
                        );
                        return Err(syn::Error::new_spanned(namevalue, msg));
                    }
                }
            }
            syn::Meta::Path(path) => {
                let name = path
                    .get_ident()
                    .ok_or_else(|| syn::Error::new_spanned(&path, "Must have specified ident"))?
                    .to_string()
                    .to_lowercase();
                let msg = match name.as_str() {
                    "worker_threads" | "max_events" => {
                        format!("The `{name}` attribute requires an argument, e.g. #[{macro_name}({name} = 2)].")
                    }
                    name => {
                        format!("Unknown attribute {name} is specified; expected one of: {KNOWN_OPTIONS}.")
                    }
                };
                return Err(syn::Error::new_spanned(path, msg));
            }
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "Unknown attribute inside the macro",
                ));
            }
        }
    }

    Ok(config.build())
}

fn parse_knobs(mut input: ItemFn, is_test: bool, config: FinalConfig) -> TokenStream {
    input.sig.asyncness = None;

    // If type mismatch occurs, rustc points to the last statement.
    let (last_stmt_start_span, last_stmt_end_span) = {
        let mut last_stmt = input.stmts.last().cloned().unwrap_or_default().into_iter();

        // Stable `Span` only points to the first token, so use the spans of the
        // first and last tokens like `syn::Error::new_spanned` does.
        let start = last_stmt.next().map_or_else(Span::call_site, |t| t.span());
        let end = last_stmt.last().map_or(start, |t| t.span());
        (start, end)
    };

    let mut rt = quote_spanned! {last_stmt_start_span=>
        evbus::runtime::Builder::new()
    };

    if let Some(v) = config.worker_threads {
        rt = quote_spanned! {last_stmt_start_span=> #rt.worker_threads(#v) };
    }

    if let Some(v) = config.max_events {
        rt = quote_spanned! {last_stmt_start_span=> #rt.max_events(#v) };
    }

    let generated_attrs = if is_test {
        quote! {
            #[::core::prelude::v1::test]
        }
    } else {
        quote! {}
    };

    // The reactor only accepts `'static` futures, so the body is moved into
    // the async block as is.
    let body = input.body();
    let body = quote! {
        let body = async move #body;
    };

    // This explicit `return` is intentional. See tokio-rs/tokio#4636
    let last_block = quote_spanned! {last_stmt_end_span=>
        #[allow(clippy::expect_used, clippy::diverging_sub_expression, clippy::needless_return)]
        {
            return #rt
                .try_build()
                .expect("Failed building the Reactor")
                .block_on(body);
        }
    };

    input.into_tokens(generated_attrs, body, last_block)
}
