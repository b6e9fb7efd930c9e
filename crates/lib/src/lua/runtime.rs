use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use mlua::prelude::*;

use crate::graph::TargetRegistry;
use crate::lua::globals;

/// Create a new Lua runtime with the `mei` global registered.
pub fn create_runtime(registry: Rc<RefCell<TargetRegistry>>) -> LuaResult<Lua> {
  let lua = Lua::new();
  globals::register_globals(&lua, registry)?;
  Ok(lua)
}

/// Load and execute a build script.
///
/// Sets `mei.dir` to the directory of the script and prepends it to
/// `package.path`, so `require` finds modules next to the script first.
pub fn load_file(lua: &Lua, path: &Path) -> LuaResult<LuaValue> {
  let canonical_path = dunce::canonicalize(path)
    .map_err(|e| LuaError::external(format!("cannot resolve '{}': {}", path.display(), e)))?;
  let content = std::fs::read_to_string(&canonical_path)
    .map_err(|e| LuaError::external(format!("cannot read '{}': {}", canonical_path.display(), e)))?;

  let dir = canonical_path
    .parent()
    .unwrap_or(Path::new(""))
    .to_string_lossy()
    .to_string();

  let package = lua.globals().get::<LuaTable>("package")?;
  let package_path = package.get::<String>("path")?;
  let sep = std::path::MAIN_SEPARATOR;
  package.set("path", format!("{dir}{sep}?.lua;{dir}{sep}?{sep}init.lua;{package_path}"))?;

  lua.globals().get::<LuaTable>("mei")?.set("dir", dir)?;

  lua
    .load(&content)
    .set_name(format!("@{}", canonical_path.display()))
    .eval::<LuaValue>()
}
