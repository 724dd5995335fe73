//! Shared-library units: a minimal versioned C vtable loaded with
//! `libloading`.
//!
//! External binaries export an `OSTINATO_UNIT_V1` vtable symbol. The host
//! side never trusts the library beyond ABI version and null checks; faults
//! at process time are caught by the wrapping node like any other unit.

use crate::error::{HostError, LoadStage, Result};
use crate::host::{NativeUnit, UnitIo};
use libloading::Library;
use std::ffi::c_void;
use std::path::Path;

pub const UNIT_ABI_VERSION: u32 = 1;
pub const UNIT_SYMBOL: &[u8] = b"OSTINATO_UNIT_V1";

/// Exported vtable for an external unit binary.
#[repr(C)]
pub struct UnitVTable {
    pub abi_version: u32,
    pub create: unsafe extern "C" fn(sample_rate: f64, max_block: u32) -> *mut c_void,
    pub destroy: unsafe extern "C" fn(instance: *mut c_void),
    pub process: unsafe extern "C" fn(
        instance: *mut c_void,
        in_l: *const f32,
        in_r: *const f32,
        out_l: *mut f32,
        out_r: *mut f32,
        n_samples: u32,
    ),
    pub set_param: unsafe extern "C" fn(instance: *mut c_void, param: u32, value: f32),
    pub get_param: unsafe extern "C" fn(instance: *mut c_void, param: u32) -> f32,
}

/// A unit loaded from a shared library.
pub struct ExternalUnit {
    // Field order matters: the instance must drop before the library.
    instance: *mut c_void,
    vtable: *const UnitVTable,
    _library: Library,
}

// The raw pointers are owned exclusively by this struct and only touched
// from whichever thread currently owns the unit.
unsafe impl Send for ExternalUnit {}

impl ExternalUnit {
    pub fn load(path: &Path) -> Result<Self> {
        let library = unsafe { Library::new(path) }.map_err(|e| HostError::LoadFailed {
            path: path.to_path_buf(),
            stage: LoadStage::Opening,
            reason: e.to_string(),
        })?;

        let vtable: *const UnitVTable = unsafe {
            let symbol = library.get::<*const UnitVTable>(UNIT_SYMBOL).map_err(|e| {
                HostError::LoadFailed {
                    path: path.to_path_buf(),
                    stage: LoadStage::Opening,
                    reason: e.to_string(),
                }
            })?;
            *symbol
        };
        if vtable.is_null() {
            return Err(HostError::LoadFailed {
                path: path.to_path_buf(),
                stage: LoadStage::Instantiation,
                reason: "null vtable".into(),
            });
        }
        let abi = unsafe { (*vtable).abi_version };
        if abi != UNIT_ABI_VERSION {
            return Err(HostError::LoadFailed {
                path: path.to_path_buf(),
                stage: LoadStage::Instantiation,
                reason: format!("ABI version {abi}, host speaks {UNIT_ABI_VERSION}"),
            });
        }

        Ok(Self {
            instance: std::ptr::null_mut(),
            vtable,
            _library: library,
        })
    }
}

impl NativeUnit for ExternalUnit {
    fn prepare(&mut self, sample_rate: f64, max_block: usize) {
        unsafe {
            if !self.instance.is_null() {
                ((*self.vtable).destroy)(self.instance);
            }
            self.instance = ((*self.vtable).create)(sample_rate, max_block as u32);
        }
    }

    fn process(&mut self, io: &mut UnitIo<'_>) {
        if self.instance.is_null() {
            return;
        }
        unsafe {
            for change in io.changes {
                ((*self.vtable).set_param)(self.instance, change.param, change.value);
            }
            let n = io.n_samples.min(io.out_l.len()).min(io.out_r.len());
            // External units are effects; without valid stereo input the
            // C side would read a dangling pointer.
            if io.in_l.len() < n || io.in_r.len() < n {
                return;
            }
            ((*self.vtable).process)(
                self.instance,
                io.in_l.as_ptr(),
                io.in_r.as_ptr(),
                io.out_l.as_mut_ptr(),
                io.out_r.as_mut_ptr(),
                n as u32,
            );
        }
    }

    fn reset(&mut self) {}
}

impl Drop for ExternalUnit {
    fn drop(&mut self) {
        if !self.instance.is_null() {
            unsafe { ((*self.vtable).destroy)(self.instance) };
            self.instance = std::ptr::null_mut();
        }
    }
}
