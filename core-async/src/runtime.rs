//! Runtime utilities that abstract over the underlying async executor.
//!
//! On native targets we wrap Tokio's runtime primitives so that downstream
//! crates never need to depend on Tokio directly. WebAssembly hosts drive
//! futures from the browser event loop and never block.

#[cfg(not(target_arch = "wasm32"))]
pub use tokio::runtime::{Builder, Handle, Runtime};

/// Runs the provided future to completion on a current-thread runtime.
///
/// Returns an error when the runtime cannot be constructed (for example when
/// the process is out of file descriptors).
#[cfg(not(target_arch = "wasm32"))]
pub fn block_on<F>(future: F) -> std::io::Result<F::Output>
where
    F: std::future::Future,
{
    let runtime = Builder::new_current_thread().enable_all().build()?;
    Ok(runtime.block_on(future))
}

#[cfg(target_arch = "wasm32")]
pub use wasm_bindgen_futures::spawn_local;
