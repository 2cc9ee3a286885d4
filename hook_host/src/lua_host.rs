//! Lua surface of the invocation bridge.
//!
//! Every worker thread owns its own Lua state with a `native` table:
//!
//! - `native.invoke(key, ...)` returns the first result word or `nil`
//! - `native.invoke_int(key, ...)`, `native.invoke_float(key, ...)` and
//!   `native.invoke_string(key, ...)` decode the result on the owner thread
//! - `native.push_long_string(text)` sends text as chunked literal calls
//! - `native.float(v)`, `native.int(v)`, `native.u64(v)`, `native.byte(v)` and
//!   `native.pointer(v)` pin an argument kind Lua numbers cannot express
//!
//! Keys are integers or `0x` hex strings.

use hook_bridge::{
    Argument, BridgeError, CallRequest, DomainHandle, FromNativeWord, FunctionKey,
};
use mlua::{
    AnyUserData, Error as LuaError, Lua, Result as LuaResult, Table, UserData, Value, Variadic,
};

/// An argument whose kind was fixed by one of the `native.*` constructors.
#[derive(Debug, Clone)]
struct NativeArg(Argument);

impl UserData for NativeArg {}

/// Maps a Lua value onto a call argument.
pub fn lua_argument(position: usize, value: &Value) -> Result<Argument, BridgeError> {
    let argument = match value {
        Value::Boolean(flag) => Argument::Bool(*flag),
        Value::Integer(raw) => match i32::try_from(*raw) {
            Ok(small) => Argument::Int(small),
            Err(_) => Argument::U64(*raw as u64),
        },
        Value::Number(raw) => Argument::Float(*raw as f32),
        Value::String(text) => Argument::Text(text.to_string_lossy().into_owned()),
        Value::LightUserData(ptr) => Argument::Pointer(ptr.0 as usize),
        Value::UserData(data) => return boxed_argument(position, data),
        other => {
            return Err(BridgeError::UnsupportedArgumentType {
                position,
                type_name: other.type_name(),
            })
        }
    };
    Ok(argument)
}

fn boxed_argument(position: usize, data: &AnyUserData) -> Result<Argument, BridgeError> {
    data.borrow::<NativeArg>()
        .map(|arg| arg.0.clone())
        .map_err(|_| BridgeError::UnsupportedArgumentType {
            position,
            type_name: "userdata",
        })
}

fn lua_arguments(values: &[Value]) -> Result<Vec<Argument>, BridgeError> {
    values
        .iter()
        .enumerate()
        .map(|(position, value)| lua_argument(position, value))
        .collect()
}

/// Reads a non-negative integer or a hex string as a 64-bit word.
fn unsigned_word(value: &Value, what: &str) -> LuaResult<u64> {
    match value {
        Value::Integer(raw) => u64::try_from(*raw)
            .map_err(|_| LuaError::external(format!("{what} must not be negative, got {raw}"))),
        Value::Number(raw) if *raw < 0.0 => Err(LuaError::external(format!(
            "{what} must not be negative, got {raw}"
        ))),
        Value::Number(raw) if raw.fract() == 0.0 => Ok(*raw as u64),
        Value::Number(raw) => Err(LuaError::external(format!(
            "{what} must be an integer, got {raw}"
        ))),
        Value::String(text) => text
            .to_string_lossy()
            .parse::<FunctionKey>()
            .map(FunctionKey::raw)
            .map_err(LuaError::external),
        other => Err(LuaError::external(format!(
            "{what} must be an integer or hex string, got {}",
            other.type_name()
        ))),
    }
}

fn function_key(value: &Value) -> LuaResult<FunctionKey> {
    unsigned_word(value, "function key").map(FunctionKey::new)
}

/// Calls `key` and decodes the first result word on the owner thread.
fn call_value<T>(handle: &DomainHandle, key: &Value, args: &[Value]) -> LuaResult<Option<T>>
where
    T: FromNativeWord + Send + 'static,
{
    let key = function_key(key)?;
    let args = lua_arguments(args).map_err(LuaError::external)?;
    let request = CallRequest::from_args(key, &args, handle.pins()).map_err(LuaError::external)?;
    handle
        .submit_with(request, |result| {
            if result.is_null() {
                return Ok(None);
            }
            result.read::<T>().map(Some)
        })
        .and_then(|read| read)
        .map_err(LuaError::external)
}

pub fn install_native_table(lua: &Lua, handle: DomainHandle, worker: usize) -> LuaResult<()> {
    let native: Table = lua.create_table()?;
    native.set("worker", worker)?;

    let invoke_handle = handle.clone();
    native.set(
        "invoke",
        lua.create_function(move |_, (key, args): (Value, Variadic<Value>)| {
            let word = call_value::<u64>(&invoke_handle, &key, &args)?;
            Ok(word.map(|word| word as i64))
        })?,
    )?;

    let int_handle = handle.clone();
    native.set(
        "invoke_int",
        lua.create_function(move |_, (key, args): (Value, Variadic<Value>)| {
            call_value::<i32>(&int_handle, &key, &args)
        })?,
    )?;

    let float_handle = handle.clone();
    native.set(
        "invoke_float",
        lua.create_function(move |_, (key, args): (Value, Variadic<Value>)| {
            call_value::<f32>(&float_handle, &key, &args)
        })?,
    )?;

    let string_handle = handle.clone();
    native.set(
        "invoke_string",
        lua.create_function(move |_, (key, args): (Value, Variadic<Value>)| {
            let key = function_key(&key)?;
            let args = lua_arguments(&args).map_err(LuaError::external)?;
            string_handle
                .invoke_text(key, &args)
                .map_err(LuaError::external)
        })?,
    )?;

    let text_handle = handle;
    native.set(
        "push_long_string",
        lua.create_function(move |_, text: mlua::String| {
            text_handle
                .push_long_string(&text.to_string_lossy())
                .map_err(LuaError::external)
        })?,
    )?;

    native.set(
        "float",
        lua.create_function(|_, value: f64| Ok(NativeArg(Argument::Float(value as f32))))?,
    )?;
    native.set(
        "int",
        lua.create_function(|_, value: i32| Ok(NativeArg(Argument::Int(value))))?,
    )?;
    native.set(
        "byte",
        lua.create_function(|_, value: u8| Ok(NativeArg(Argument::Byte(value))))?,
    )?;
    native.set(
        "u64",
        lua.create_function(|_, value: Value| {
            Ok(NativeArg(Argument::U64(unsigned_word(&value, "u64 argument")?)))
        })?,
    )?;
    native.set(
        "pointer",
        lua.create_function(|_, value: Value| {
            Ok(NativeArg(Argument::Pointer(unsigned_word(&value, "pointer")? as usize)))
        })?,
    )?;

    lua.globals().set("native", native)?;
    Ok(())
}

/// Runs `source` on the calling thread against `handle`.
pub fn run_chunk(handle: DomainHandle, worker: usize, source: &str, name: &str) -> LuaResult<()> {
    let lua = Lua::new();
    install_native_table(&lua, handle, worker)?;
    lua.load(source).set_name(name).exec()
}
