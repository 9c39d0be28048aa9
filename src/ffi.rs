//! C FFI surface of the binding.
//!
//! Conventions, shared by both engine surfaces:
//! - `#[no_mangle] pub extern "C" fn` for all exports
//! - `#[repr(C)]` for all shared structs
//! - opaque `Box`-allocated handles with explicit free functions
//! - raw pointer + length pairs for all byte buffers (binary-safe, no
//!   null-termination assumed); buffers are borrowed for the duration of
//!   the call and never retained
//!
//! Every recoverable failure is signaled as a null handle. Passing a
//! dangling handle, freeing a handle twice, or requesting a copy larger
//! than the reported length is undefined behavior (caller contract); null
//! pointers are checked wherever the check is free.

use std::ffi::CString;
use std::ptr;
use std::slice;

use libc::{c_char, size_t};

use crate::disambiguator::{self, DisambiguatorRuntime};
use crate::memstream::OutputSink;
use crate::tokenizer::{self, TokenizeSettings};

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Opaque handle to a completed output sink. Owned by the caller from the
/// moment a run entry point returns it; released exactly once via the
/// matching free entry point.
pub struct OutputHandle(OutputSink);

/// Opaque handle to a disambiguator runtime record.
pub struct RuntimeHandle(DisambiguatorRuntime);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Materialize a caller-owned byte region. A zero-length region is valid
/// regardless of the pointer; a null pointer with a non-zero length is not.
unsafe fn byte_region<'a>(data: *const u8, size: size_t) -> Option<&'a [u8]> {
    if size == 0 {
        return Some(&[]);
    }
    if data.is_null() {
        return None;
    }
    Some(slice::from_raw_parts(data, size))
}

/// Measure the completed sink, report its length through the out-param,
/// and hand ownership to the caller.
fn finish_run(mut sink: OutputSink, output_size: *mut size_t) -> *mut OutputHandle {
    let size = sink.measure() as size_t;
    unsafe { *output_size = size };
    Box::into_raw(Box::new(OutputHandle(sink)))
}

fn copy_output(handle: *mut OutputHandle, output: *mut u8, size: size_t) {
    if handle.is_null() || output.is_null() {
        return;
    }
    let sink = unsafe { &mut (*handle).0 };
    let dest = unsafe { slice::from_raw_parts_mut(output, size) };
    let _ = sink.copy_to(dest);
}

fn free_output(handle: *mut OutputHandle) {
    if !handle.is_null() {
        unsafe { drop(Box::from_raw(handle)) };
    }
}

// ===========================================================================
// Disambiguator FFI
// ===========================================================================

/// Create a disambiguator runtime record. Every run call requires one; the
/// caller frees it with `disambiguator_runtime_free` once done with the
/// engine. Runs against distinct records are independent; sharing one
/// record across threads is the caller's responsibility.
#[no_mangle]
pub extern "C" fn disambiguator_runtime_new(verbose: bool) -> *mut RuntimeHandle {
    Box::into_raw(Box::new(RuntimeHandle(DisambiguatorRuntime::new(verbose))))
}

/// Free a runtime record created by `disambiguator_runtime_new`.
#[no_mangle]
pub extern "C" fn disambiguator_runtime_free(runtime: *mut RuntimeHandle) {
    if !runtime.is_null() {
        unsafe { drop(Box::from_raw(runtime)) };
    }
}

/// Run the disambiguator end to end, synchronously.
///
/// # Arguments
/// * `runtime` - Runtime record from `disambiguator_runtime_new`.
/// * `grammar_data`, `grammar_size` - Rule grammar blob (JSON).
/// * `input_data`, `input_size` - Tagged cohort stream.
/// * `output_size` - Out-parameter receiving the output length in bytes.
///
/// Returns a handle to the completed output sink, or null if the runtime
/// is missing, the grammar does not load, or the run fails. There is no
/// partial-success state: either a fully-formed sink is returned or
/// nothing is. The caller must check for null before calling
/// `disambiguator_copy_output` or `disambiguator_free`.
#[no_mangle]
pub extern "C" fn disambiguator_run(
    runtime: *const RuntimeHandle,
    grammar_data: *const u8,
    grammar_size: size_t,
    input_data: *const u8,
    input_size: size_t,
    output_size: *mut size_t,
) -> *mut OutputHandle {
    if runtime.is_null() || output_size.is_null() {
        return ptr::null_mut();
    }
    let runtime = unsafe { &(*runtime).0 };
    let grammar = match unsafe { byte_region(grammar_data, grammar_size) } {
        Some(region) => region,
        None => return ptr::null_mut(),
    };
    let input = match unsafe { byte_region(input_data, input_size) } {
        Some(region) => region,
        None => return ptr::null_mut(),
    };

    match disambiguator::run_buffer(runtime, grammar, input) {
        Ok(sink) => finish_run(sink, output_size),
        Err(e) => {
            if runtime.verbose() {
                eprintln!("disambiguator: run failed: {:#}", e);
            }
            ptr::null_mut()
        }
    }
}

/// Release an output sink returned by `disambiguator_run`. Exactly once
/// per handle; the handle must not be used afterwards.
#[no_mangle]
pub extern "C" fn disambiguator_free(handle: *mut OutputHandle) {
    free_output(handle);
}

/// Copy `size` bytes from the start of the sink into `output`. `size` must
/// not exceed the length reported by `disambiguator_run`; the caller
/// allocates `output` accordingly. Repeatable: every call re-reads from
/// the start.
#[no_mangle]
pub extern "C" fn disambiguator_copy_output(
    handle: *mut OutputHandle,
    output: *mut u8,
    size: size_t,
) {
    copy_output(handle, output, size);
}

// ===========================================================================
// Tokenizer FFI
// ===========================================================================

/// Run the tokenizer end to end, synchronously.
///
/// # Arguments
/// * `settings` - Caller-owned settings record; read, never mutated.
/// * `definition_data`, `definition_size` - Serialized tokenizer definition.
/// * `input_data`, `input_size` - Input text.
/// * `output_size` - Out-parameter receiving the output length in bytes.
///
/// Returns a handle to the completed output sink, or null if the settings
/// record is missing, the definition does not parse, or the run fails;
/// the same convention as `disambiguator_run`.
#[no_mangle]
pub extern "C" fn tokenizer_run(
    settings: *const TokenizeSettings,
    definition_data: *const u8,
    definition_size: size_t,
    input_data: *const u8,
    input_size: size_t,
    output_size: *mut size_t,
) -> *mut OutputHandle {
    if settings.is_null() || output_size.is_null() {
        return ptr::null_mut();
    }
    let settings = unsafe { &*settings };
    let definition = match unsafe { byte_region(definition_data, definition_size) } {
        Some(region) => region,
        None => return ptr::null_mut(),
    };
    let input = match unsafe { byte_region(input_data, input_size) } {
        Some(region) => region,
        None => return ptr::null_mut(),
    };

    match tokenizer::run_buffer(settings, definition, input) {
        Ok(sink) => finish_run(sink, output_size),
        Err(e) => {
            if settings.verbose {
                eprintln!("tokenizer: run failed: {:#}", e);
            }
            ptr::null_mut()
        }
    }
}

/// Release an output sink returned by `tokenizer_run`. Exactly once per
/// handle; the handle must not be used afterwards.
#[no_mangle]
pub extern "C" fn tokenizer_free(handle: *mut OutputHandle) {
    free_output(handle);
}

/// Copy `size` bytes from the start of the sink into `output`. `size` must
/// not exceed the length reported by `tokenizer_run`. Repeatable: every
/// call re-reads from the start.
#[no_mangle]
pub extern "C" fn tokenizer_copy_output(handle: *mut OutputHandle, output: *mut u8, size: size_t) {
    copy_output(handle, output, size);
}

// ===========================================================================
// Library info / memory management
// ===========================================================================

/// Library version as a C string. The caller owns the returned string and
/// releases it with `gramtok_free_string`.
#[no_mangle]
pub extern "C" fn gramtok_version() -> *mut c_char {
    CString::new(env!("CARGO_PKG_VERSION"))
        .map(|s| s.into_raw())
        .unwrap_or(ptr::null_mut())
}

/// Free a C string allocated by this library.
#[no_mangle]
pub extern "C" fn gramtok_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe { drop(CString::from_raw(ptr)) };
    }
}
