//! Built-in native functions.
//!
//! Exactly one built-in ships with the core: `println`. Hosts extend the
//! global table through [`Vm::register_native`]; the slot indices reported
//! by [`Vm::resolve_global`] follow registration order, so `println` is
//! always slot 0 when [`install`] runs first.

use crate::error::Result;
use crate::value::Value;
use crate::vm::{Fiber, NativeOutcome, Vm};

/// Register the standard globals.
pub fn install(vm: &mut Vm) {
    vm.register_native("println", 1, println_native);
}

/// Print the arguments separated by single spaces, then a newline.
/// Returns `nil`.
fn println_native(fiber: &mut Fiber, _cursor: u32, slots: usize) -> Result<NativeOutcome> {
    let line = fiber.stack()[slots + 1..]
        .iter()
        .map(|val| val.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    fiber.write_line(line);
    fiber.push(Value::Nil)?;
    Ok(NativeOutcome::Finished)
}
