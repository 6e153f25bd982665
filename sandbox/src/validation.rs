//! WASM module validation: ABI compatibility checks.
//!
//! Validates that a compiled module looks like a Go `js/wasm` binary before
//! it is instantiated. Checks:
//!
//! 1. Memory export `mem` present
//! 2. `getsp`, `run` and `resume` exported with the right signatures
//! 3. All imports are known hooks from the `go`/`gojs` modules
//! 4. Every import is a function taking a single i32 (the stack pointer)

use wasmtime::{ExternType, Module, ValType};

use crate::error::BridgeError;
use crate::linker::{HOOKS, IMPORT_MODULES};

/// Check if a ValType is i32.
fn is_i32(vt: &ValType) -> bool {
    matches!(vt, ValType::I32)
}

/// Expected export: (name, param_count_of_i32, result_count_of_i32).
/// All params and results are i32 in the Go `js/wasm` ABI.
const REQUIRED_EXPORTS: &[(&str, usize, usize)] = &[
    ("getsp", 0, 1),
    ("run", 2, 0),
    ("resume", 0, 0),
];

/// Name of the required memory export.
const MEMORY_EXPORT: &str = "mem";

/// Validate that a WASM module meets the Go `js/wasm` ABI.
pub fn validate_module(module: &Module) -> Result<(), BridgeError> {
    validate_exports(module)?;
    validate_imports(module)?;
    Ok(())
}

/// Check that all required exports are present with correct signatures.
fn validate_exports(module: &Module) -> Result<(), BridgeError> {
    let has_memory = module
        .exports()
        .any(|e| e.name() == MEMORY_EXPORT && matches!(e.ty(), ExternType::Memory(_)));
    if !has_memory {
        return Err(BridgeError::ValidationError(format!(
            "module must export '{}'",
            MEMORY_EXPORT
        )));
    }

    for &(name, expected_param_count, expected_result_count) in REQUIRED_EXPORTS {
        let export = module
            .exports()
            .find(|e| e.name() == name)
            .ok_or_else(|| {
                BridgeError::ValidationError(format!("missing required export: {}", name))
            })?;

        let func_ty = match export.ty() {
            ExternType::Func(ft) => ft,
            _ => {
                return Err(BridgeError::ValidationError(format!(
                    "export '{}' must be a function",
                    name
                )));
            }
        };

        let params: Vec<ValType> = func_ty.params().collect();
        let results: Vec<ValType> = func_ty.results().collect();

        if params.len() != expected_param_count || !params.iter().all(is_i32) {
            return Err(BridgeError::ValidationError(format!(
                "export '{}' has wrong param signature: expected {} i32 params, got {} params",
                name,
                expected_param_count,
                params.len()
            )));
        }

        if results.len() != expected_result_count || !results.iter().all(is_i32) {
            return Err(BridgeError::ValidationError(format!(
                "export '{}' has wrong result signature: expected {} i32 results, got {} results",
                name,
                expected_result_count,
                results.len()
            )));
        }
    }

    Ok(())
}

/// Check that every import is a known hook with the `(sp i32)` signature.
fn validate_imports(module: &Module) -> Result<(), BridgeError> {
    for import in module.imports() {
        let module_name = import.module();

        if !IMPORT_MODULES.iter().any(|m| *m == module_name) {
            return Err(BridgeError::ValidationError(format!(
                "import from unknown module '{}' (only {:?} allowed): {}",
                module_name,
                IMPORT_MODULES,
                import.name()
            )));
        }

        if !HOOKS.iter().any(|(name, _)| *name == import.name()) {
            return Err(BridgeError::ValidationError(format!(
                "unknown host function: {}::{}",
                module_name,
                import.name()
            )));
        }

        let func_ty = match import.ty() {
            ExternType::Func(ft) => ft,
            _ => {
                return Err(BridgeError::ValidationError(format!(
                    "non-function import not allowed: {}::{}",
                    module_name,
                    import.name()
                )));
            }
        };

        let params: Vec<ValType> = func_ty.params().collect();
        if params.len() != 1 || !is_i32(&params[0]) || func_ty.results().len() != 0 {
            return Err(BridgeError::ValidationError(format!(
                "import {}::{} must have signature (i32) -> ()",
                module_name,
                import.name()
            )));
        }
    }

    Ok(())
}
