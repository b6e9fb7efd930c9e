//! The `mei` global table.
//!
//! - `mei.os` - Operating system name (e.g., "linux", "macos", "windows")
//! - `mei.arch` - CPU architecture (e.g., "x86_64", "aarch64")
//! - `mei.dir` - Directory of the build script, set when a script is loaded
//! - `mei.library{}` - Declare a static library target
//! - `mei.executable{}` - Declare an executable target

use std::cell::RefCell;
use std::rc::Rc;

use mlua::prelude::*;

use super::target::register_target_functions;
use crate::graph::TargetRegistry;

/// Register the `mei` global table in the Lua runtime.
pub fn register_globals(lua: &Lua, registry: Rc<RefCell<TargetRegistry>>) -> LuaResult<()> {
  let mei = lua.create_table()?;

  mei.set("os", std::env::consts::OS)?;
  mei.set("arch", std::env::consts::ARCH)?;

  register_target_functions(lua, &mei, registry)?;

  lua.globals().set("mei", mei)?;

  Ok(())
}
