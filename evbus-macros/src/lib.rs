#![allow(clippy::needless_doctest_main)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub
)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]

//! Attribute macros building an evbus `Reactor` around an async function.

mod entry;
mod parse;

/// Runs an async `main` on a reactor built on the main thread.
///
/// The body is wrapped in a coroutine and driven by `Reactor::block_on`, so
/// it may await any evbus task. The reactor is torn down when `main` returns.
///
/// # Options
///
/// - `worker_threads = N`: size of the pool running `evbus::blocking` calls.
///   Defaults to the number of CPUs.
/// - `max_events = N`: OS events handled per reactor wakeup.
///
/// Function arguments are NOT allowed.
///
/// # Usage
///
/// ```no_run
/// #[evbus::main(worker_threads = 2)]
/// async fn main() -> anyhow::Result<()> {
///     evbus::time::yield_now().await?;
///     Ok(())
/// }
/// ```
///
/// Equivalent code not using `#[evbus::main]`
///
/// ```no_run
/// fn main() -> anyhow::Result<()> {
///     evbus::runtime::Builder::new()
///         .worker_threads(2)
///         .try_build()
///         .unwrap()
///         .block_on(async {
///             evbus::time::yield_now().await?;
///             Ok(())
///         })
/// }
/// ```
#[proc_macro_attribute]
pub fn main(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::main(args.into(), item.into()).into()
}

/// Like [`main`](macro@main), for tests. Each test gets its own reactor on
/// the test thread and accepts the same options.
///
/// ```no_run
/// #[evbus::test(worker_threads = 1)]
/// async fn my_test() -> anyhow::Result<()> {
///     let v = evbus::blocking(|| Ok(5)).await?;
///     assert_eq!(v, 5);
///     Ok(())
/// }
/// ```
#[proc_macro_attribute]
pub fn test(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::test(args.into(), item.into()).into()
}
