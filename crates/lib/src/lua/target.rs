//! Target tables: `mei.library{}` and `mei.executable{}`.
//!
//! ```lua
//! local ryuko = mei.library {
//!   name = "ryuko",
//!   include = { "src" },
//!   packages = { "fmt", "shaderc" },
//!   flags = { "-Wall", "-Wextra" },
//!   standard = "20",
//!   link = { "stdc++" },
//!   dir = "src/ryuko",
//!   pch = "src/ryuko/pch.hpp",
//! }
//!
//! mei.executable {
//!   name = "cli",
//!   include = { "cli", "src" },
//!   dir = "cli",
//!   depend_on = { ryuko },
//! }
//! ```
//!
//! List fields accept a single string or an array of strings. `depend_on`
//! entries may be target names or the tables returned by earlier calls.
//! Relative paths are resolved against the directory of the build script.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use mlua::prelude::*;

use crate::graph::TargetRegistry;
use crate::target::{TargetDescriptor, TargetKind};

const FIELDS: &[&str] = &[
  "name",
  "include",
  "packages",
  "flags",
  "standard",
  "link",
  "dir",
  "directories",
  "pch",
  "depend_on",
];

/// Register `mei.library` and `mei.executable` on the `mei` table.
pub fn register_target_functions(lua: &Lua, mei: &LuaTable, registry: Rc<RefCell<TargetRegistry>>) -> LuaResult<()> {
  for kind in [TargetKind::Library, TargetKind::Executable] {
    let registry = registry.clone();
    let define = lua.create_function(move |lua, table: LuaTable| {
      let base_dir = script_dir(lua)?;
      let target = parse_target(&table, kind, &base_dir)?;
      let name = target.name.clone();

      registry.borrow_mut().register(target).map_err(LuaError::external)?;

      let handle = lua.create_table()?;
      handle.set("name", name)?;
      handle.set("kind", kind.as_str())?;
      Ok(handle)
    })?;
    mei.set(kind.as_str(), define)?;
  }
  Ok(())
}

/// Directory of the build script being evaluated (`mei.dir`).
fn script_dir(lua: &Lua) -> LuaResult<PathBuf> {
  let mei: LuaTable = lua.globals().get("mei")?;
  let dir: Option<String> = mei.get("dir")?;
  Ok(dir.map(PathBuf::from).unwrap_or_default())
}

/// Build a descriptor from a target table.
pub fn parse_target(table: &LuaTable, kind: TargetKind, base_dir: &Path) -> LuaResult<TargetDescriptor> {
  let name: String = match table.get::<LuaValue>("name")? {
    LuaValue::String(s) if !s.to_str()?.is_empty() => s.to_str()?.to_string(),
    _ => return Err(LuaError::external(format!("{} requires a non-empty 'name' field", kind))),
  };

  for pair in table.pairs::<LuaValue, LuaValue>() {
    let (key, _) = pair?;
    let known = match &key {
      LuaValue::String(s) => FIELDS.contains(&&*s.to_str()?),
      _ => false,
    };
    if !known {
      return Err(LuaError::external(format!(
        "unknown field {} in target '{}'",
        describe_key(&key),
        name
      )));
    }
  }

  let resolve = |p: String| -> PathBuf {
    let path = PathBuf::from(p);
    if path.is_absolute() { path } else { base_dir.join(path) }
  };

  let mut target = TargetDescriptor::new(&name, kind);

  for dir in string_list(table, "dir", &name)?
    .into_iter()
    .chain(string_list(table, "directories", &name)?)
  {
    target = target.with_source_directory(resolve(dir));
  }
  for include in string_list(table, "include", &name)? {
    target = target.with_include_path(resolve(include));
  }
  for package in string_list(table, "packages", &name)? {
    target = target.with_package(package);
  }
  target = target.with_compiler_flags(string_list(table, "flags", &name)?);
  for library in string_list(table, "link", &name)? {
    target = target.with_linked_library(library);
  }

  match table.get::<LuaValue>("standard")? {
    LuaValue::Nil => {}
    LuaValue::String(s) => target = target.with_standard(s.to_str()?.to_string()),
    LuaValue::Integer(n) => target = target.with_standard(n.to_string()),
    other => {
      return Err(LuaError::external(format!(
        "field 'standard' in target '{}' must be a string or integer, got {}",
        name,
        other.type_name()
      )));
    }
  }

  match table.get::<LuaValue>("pch")? {
    LuaValue::Nil => {}
    LuaValue::String(s) => target = target.with_precompiled_header(resolve(s.to_str()?.to_string())),
    other => {
      return Err(LuaError::external(format!(
        "field 'pch' in target '{}' must be a string, got {}",
        name,
        other.type_name()
      )));
    }
  }

  for dependency in dependency_names(table, &name)? {
    target = target.with_dependency(dependency);
  }

  Ok(target)
}

fn describe_key(key: &LuaValue) -> String {
  match key {
    LuaValue::String(s) => format!("'{}'", s.to_string_lossy()),
    LuaValue::Integer(i) => format!("[{}]", i),
    other => format!("of type {}", other.type_name()),
  }
}

/// Read a field holding a string or an array of strings.
fn string_list(table: &LuaTable, key: &str, target: &str) -> LuaResult<Vec<String>> {
  match table.get::<LuaValue>(key)? {
    LuaValue::Nil => Ok(Vec::new()),
    LuaValue::String(s) => Ok(vec![s.to_str()?.to_string()]),
    LuaValue::Table(items) => items
      .sequence_values::<LuaValue>()
      .map(|item| match item? {
        LuaValue::String(s) => Ok(s.to_str()?.to_string()),
        other => Err(LuaError::external(format!(
          "field '{}' in target '{}' must contain strings, got {}",
          key,
          target,
          other.type_name()
        ))),
      })
      .collect(),
    other => Err(LuaError::external(format!(
      "field '{}' in target '{}' must be a string or a list of strings, got {}",
      key,
      target,
      other.type_name()
    ))),
  }
}

/// Read `depend_on`: names, target handles, or a list of either.
fn dependency_names(table: &LuaTable, target: &str) -> LuaResult<Vec<String>> {
  let reference = |value: LuaValue| -> LuaResult<String> {
    match value {
      LuaValue::String(s) => Ok(s.to_str()?.to_string()),
      LuaValue::Table(t) => t
        .get::<Option<String>>("name")?
        .ok_or_else(|| LuaError::external(format!("dependency of target '{}' has no 'name'", target))),
      other => Err(LuaError::external(format!(
        "dependency of target '{}' must be a name or target, got {}",
        target,
        other.type_name()
      ))),
    }
  };

  match table.get::<LuaValue>("depend_on")? {
    LuaValue::Nil => Ok(Vec::new()),
    // A single handle has a `name`; a list does not
    LuaValue::Table(t) if t.contains_key("name")? => Ok(vec![reference(LuaValue::Table(t))?]),
    LuaValue::Table(t) => t.sequence_values::<LuaValue>().map(|v| reference(v?)).collect(),
    other => Ok(vec![reference(other)?]),
  }
}
