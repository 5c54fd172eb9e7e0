//! Decoder plugin loading.
//!
//! A decoder is a dynamically loadable module exposing a small C-ABI
//! contract. Symbols are resolved and validated once at load time into a
//! fixed descriptor; call sites never re-resolve them.
//!
//! Required exports:
//! - `try_decode(bytes, len) -> *mut DecodeResult`: returns a bundle
//!   allocated with `malloc`; the worker copies it and frees it.
//! - `decoder_name`: a `*const c_char` static naming the decoder.
//!
//! Optional exports:
//! - `decoder_setup()`: run once before the worker loop.
//! - `decoder_teardown()`: run once during cleanup.

use std::ffi::{c_char, CStr};
use std::path::Path;

use libloading::Library;
use thiserror::Error;
use tracing::debug;

use crate::layout::DecodeResult;

type TryDecodeFn = unsafe extern "C" fn(*const u8, usize) -> *mut DecodeResult;
type HookFn = unsafe extern "C" fn();

/// Errors that can occur when loading a decoder module.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("decoder library not found or not loadable: {0}")]
    LibraryNotFound(String),

    #[error("required symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("decoder name is not valid UTF-8")]
    BadName,
}

/// A loaded, validated decoder.
///
/// The descriptor owns the library for the worker's lifetime; the raw
/// function pointers below stay valid exactly as long as `_lib` lives.
#[derive(Debug)]
pub struct DecoderPlugin {
    name: String,
    decode: TryDecodeFn,
    setup: Option<HookFn>,
    teardown: Option<HookFn>,
    // None only for in-process test descriptors.
    _lib: Option<Library>,
}

impl DecoderPlugin {
    /// Load a decoder module and resolve its contract.
    pub fn load(path: &Path) -> Result<Self, PluginError> {
        // SAFETY: loading an operator-specified decoder module. The module
        // must uphold the exported contract above.
        let lib = unsafe { Library::new(path) }.map_err(|e| {
            PluginError::LibraryNotFound(format!("{}: {e}", path.display()))
        })?;

        // SAFETY: symbol signatures match the documented C contract. Each
        // Symbol is dereferenced to copy the raw pointer out of the
        // borrow, then the library is moved into the descriptor.
        let (name, decode, setup, teardown) = unsafe {
            let decode = *lib
                .get::<TryDecodeFn>(b"try_decode\0")
                .map_err(|e| PluginError::SymbolNotFound(format!("try_decode: {e}")))?;

            // `decoder_name` is a pointer-sized static: the symbol address
            // holds the char pointer, so it takes one extra dereference.
            let name_sym = lib
                .get::<*mut *const c_char>(b"decoder_name\0")
                .map_err(|e| PluginError::SymbolNotFound(format!("decoder_name: {e}")))?;
            let name_ptr: *const c_char = **name_sym;
            if name_ptr.is_null() {
                return Err(PluginError::SymbolNotFound("decoder_name is null".into()));
            }
            let name = CStr::from_ptr(name_ptr)
                .to_str()
                .map_err(|_| PluginError::BadName)?
                .to_owned();

            let setup = lib.get::<HookFn>(b"decoder_setup\0").ok().map(|s| *s);
            let teardown = lib.get::<HookFn>(b"decoder_teardown\0").ok().map(|s| *s);

            (name, decode, setup, teardown)
        };

        debug!(
            name = %name,
            has_setup = setup.is_some(),
            has_teardown = teardown.is_some(),
            "decoder loaded"
        );

        Ok(Self {
            name,
            decode,
            setup,
            teardown,
            _lib: Some(lib),
        })
    }

    /// Descriptor with no backing library, for exercising the worker loop
    /// in-process. Declines every decode.
    #[cfg(test)]
    pub(crate) fn null_decoder() -> Self {
        unsafe extern "C" fn decode_none(_bytes: *const u8, _len: usize) -> *mut DecodeResult {
            std::ptr::null_mut()
        }

        Self {
            name: "null".to_owned(),
            decode: decode_none,
            setup: None,
            teardown: None,
            _lib: None,
        }
    }

    /// Run the optional setup hook. Called exactly once, before the loop.
    pub fn setup(&self) {
        if let Some(setup) = self.setup {
            // SAFETY: zero-argument hook from the validated contract.
            unsafe { setup() };
        }
    }

    /// Invoke the decoder on one claimed payload.
    ///
    /// A null return is the decoder declining to produce a bundle; it is
    /// carried as an all-zero result, not a protocol error.
    pub fn decode(&self, bytes: &[u8]) -> DecodeResult {
        // SAFETY: pointer/length describe a live slice; the plugin returns
        // either null or a malloc-allocated DecodeResult it hands over.
        let raw = unsafe { (self.decode)(bytes.as_ptr(), bytes.len()) };
        if raw.is_null() {
            return DecodeResult::none();
        }
        let result = unsafe { *raw };
        unsafe { libc::free(raw as *mut libc::c_void) };
        result
    }

    /// Decoder display name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for DecoderPlugin {
    fn drop(&mut self) {
        // Teardown is not reentrant-safe; it runs here and nowhere else,
        // once per process, on every exit path that loaded the plugin.
        if let Some(teardown) = self.teardown {
            // SAFETY: zero-argument hook from the validated contract.
            unsafe { teardown() };
        }
    }
}
