//! The `js_*` handle table imports
//!
//! Every import takes only integers and floats. Strings and buffers cross
//! as (pointer, length) pairs into the guest's exported linear memory.
//!
//! | Import | Params | Result |
//! |---|---|---|
//! | `js_create_string` | ptr, len | handle |
//! | `js_create_buffer` | ptr, len | handle |
//! | `js_create_object` | | handle |
//! | `js_set_field_f32` | handle, name_ptr, name_len, f32 | |
//! | `js_set_field_u32` | handle, name_ptr, name_len, u32 | |
//! | `js_set_field_string` | handle, name_ptr, name_len, val_ptr, val_len | |
//! | `js_unwrap_to_str` | handle, ptr, max_len | |
//! | `js_unwrap_to_buf` | handle, ptr, max_len | |
//! | `js_string_length` | handle | length |
//! | `js_buf_length` | handle | length |
//! | `js_free_object` | handle | |
//! | `js_have_field` | handle, name_ptr, name_len | 0 / 1 |
//! | `js_field_f32` | handle, name_ptr, name_len | f32 |
//! | `js_field_u32` | handle, name_ptr, name_len | u32 |
//! | `js_field` | handle, name_ptr, name_len | handle |
//! | `js_field_num` | handle, name_ptr, name_len | f64 |

use crate::config::{BridgeConfig, ErrorPolicy};
use crate::error::HostError;
use crate::plugin::Plugin;
use crate::HostState;
use std::sync::Arc;
use tether_core::{BridgeResult, Handle, HandleTable};
use wasmi::errors::LinkerError;
use wasmi::{Caller, Extern, Linker};

pub const PLUGIN_NAME: &str = "sapp_jsutils";
pub const PLUGIN_VERSION: &str = "0.1.5";

const UNDEFINED: i32 = Handle::UNDEFINED.raw();

/// Plugin exposing the handle table to the guest.
#[derive(Debug, Clone)]
pub struct JsUtils {
    import_module: String,
    site: CallSite,
}

impl JsUtils {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            import_module: config.import_module.clone(),
            site: CallSite {
                memory_export: Arc::from(config.memory_export.as_str()),
                error_policy: config.error_policy,
            },
        }
    }
}

impl Default for JsUtils {
    fn default() -> Self {
        Self::new(&BridgeConfig::default())
    }
}

/// Per-import context captured by every host closure.
#[derive(Debug, Clone)]
struct CallSite {
    memory_export: Arc<str>,
    error_policy: ErrorPolicy,
}

impl CallSite {
    /// Run `op` against the table alone.
    fn with_table<S: HostState, R>(
        &self,
        caller: &mut Caller<'_, S>,
        import: &'static str,
        fallback: R,
        op: impl FnOnce(&mut HandleTable) -> BridgeResult<R>,
    ) -> Result<R, wasmi::Error> {
        let result = op(caller.data_mut().handle_table());
        self.settle(import, fallback, result)
    }

    /// Run `op` against guest memory and the table together.
    fn with_memory<S: HostState, R>(
        &self,
        caller: &mut Caller<'_, S>,
        import: &'static str,
        fallback: R,
        op: impl FnOnce(&mut [u8], &mut HandleTable) -> BridgeResult<R>,
    ) -> Result<R, wasmi::Error> {
        let Some(memory) = caller
            .get_export(&self.memory_export)
            .and_then(Extern::into_memory)
        else {
            let err = HostError::MissingMemory {
                name: self.memory_export.to_string(),
            };
            return Err(wasmi::Error::new(format!("{import}: {err}")));
        };
        let (mem, state) = memory.data_and_store_mut(&mut *caller);
        let result = op(mem, state.handle_table());
        self.settle(import, fallback, result)
    }

    fn settle<R>(
        &self,
        import: &'static str,
        fallback: R,
        result: BridgeResult<R>,
    ) -> Result<R, wasmi::Error> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => match self.error_policy {
                ErrorPolicy::Trap => {
                    tracing::error!(import, %err, "bridge call trapped");
                    Err(wasmi::Error::new(format!("{import}: {err}")))
                }
                ErrorPolicy::Lenient => {
                    tracing::warn!(import, %err, "bridge call failed, returning fallback");
                    Ok(fallback)
                }
            },
        }
    }
}

impl<S: HostState + 'static> Plugin<S> for JsUtils {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn version(&self) -> &str {
        PLUGIN_VERSION
    }

    fn register(&self, linker: &mut Linker<S>) -> Result<(), HostError> {
        let module = self.import_module.as_str();
        let link_err = |function: &'static str| {
            move |source: LinkerError| HostError::Link {
                module: module.to_string(),
                function,
                source,
            }
        };

        // ------------------------------------------------------------------
        // Creation
        // ------------------------------------------------------------------

        let site = self.site.clone();
        linker
            .func_wrap(
                module,
                "js_create_string",
                move |mut caller: Caller<'_, S>, ptr: u32, len: u32| -> Result<i32, wasmi::Error> {
                    site.with_memory(&mut caller, "js_create_string", UNDEFINED, |mem, table| {
                        table.create_string(mem, ptr, len).map(i32::from)
                    })
                },
            )
            .map_err(link_err("js_create_string"))?;

        let site = self.site.clone();
        linker
            .func_wrap(
                module,
                "js_create_buffer",
                move |mut caller: Caller<'_, S>, ptr: u32, len: u32| -> Result<i32, wasmi::Error> {
                    site.with_memory(&mut caller, "js_create_buffer", UNDEFINED, |mem, table| {
                        table.create_buffer(mem, ptr, len).map(i32::from)
                    })
                },
            )
            .map_err(link_err("js_create_buffer"))?;

        let site = self.site.clone();
        linker
            .func_wrap(
                module,
                "js_create_object",
                move |mut caller: Caller<'_, S>| -> Result<i32, wasmi::Error> {
                    site.with_table(&mut caller, "js_create_object", UNDEFINED, |table| {
                        table.create_object().map(i32::from)
                    })
                },
            )
            .map_err(link_err("js_create_object"))?;

        // ------------------------------------------------------------------
        // Field writes
        // ------------------------------------------------------------------

        let site = self.site.clone();
        linker
            .func_wrap(
                module,
                "js_set_field_f32",
                move |mut caller: Caller<'_, S>,
                      handle: i32,
                      name_ptr: u32,
                      name_len: u32,
                      value: f32|
                      -> Result<(), wasmi::Error> {
                    site.with_memory(&mut caller, "js_set_field_f32", (), |mem, table| {
                        table.set_field_f32(mem, Handle::from_raw(handle), name_ptr, name_len, value)
                    })
                },
            )
            .map_err(link_err("js_set_field_f32"))?;

        let site = self.site.clone();
        linker
            .func_wrap(
                module,
                "js_set_field_u32",
                move |mut caller: Caller<'_, S>,
                      handle: i32,
                      name_ptr: u32,
                      name_len: u32,
                      value: u32|
                      -> Result<(), wasmi::Error> {
                    site.with_memory(&mut caller, "js_set_field_u32", (), |mem, table| {
                        table.set_field_u32(mem, Handle::from_raw(handle), name_ptr, name_len, value)
                    })
                },
            )
            .map_err(link_err("js_set_field_u32"))?;

        let site = self.site.clone();
        linker
            .func_wrap(
                module,
                "js_set_field_string",
                move |mut caller: Caller<'_, S>,
                      handle: i32,
                      name_ptr: u32,
                      name_len: u32,
                      value_ptr: u32,
                      value_len: u32|
                      -> Result<(), wasmi::Error> {
                    site.with_memory(&mut caller, "js_set_field_string", (), |mem, table| {
                        table.set_field_string(
                            mem,
                            Handle::from_raw(handle),
                            name_ptr,
                            name_len,
                            value_ptr,
                            value_len,
                        )
                    })
                },
            )
            .map_err(link_err("js_set_field_string"))?;

        // ------------------------------------------------------------------
        // Unwrapping into guest memory
        // ------------------------------------------------------------------

        let site = self.site.clone();
        linker
            .func_wrap(
                module,
                "js_unwrap_to_str",
                move |mut caller: Caller<'_, S>,
                      handle: i32,
                      ptr: u32,
                      max_len: u32|
                      -> Result<(), wasmi::Error> {
                    site.with_memory(&mut caller, "js_unwrap_to_str", (), |mem, table| {
                        table.unwrap_to_str(Handle::from_raw(handle), mem, ptr, max_len)
                    })
                },
            )
            .map_err(link_err("js_unwrap_to_str"))?;

        let site = self.site.clone();
        linker
            .func_wrap(
                module,
                "js_unwrap_to_buf",
                move |mut caller: Caller<'_, S>,
                      handle: i32,
                      ptr: u32,
                      max_len: u32|
                      -> Result<(), wasmi::Error> {
                    site.with_memory(&mut caller, "js_unwrap_to_buf", (), |mem, table| {
                        table.unwrap_to_buf(Handle::from_raw(handle), mem, ptr, max_len)
                    })
                },
            )
            .map_err(link_err("js_unwrap_to_buf"))?;

        let site = self.site.clone();
        linker
            .func_wrap(
                module,
                "js_string_length",
                move |mut caller: Caller<'_, S>, handle: i32| -> Result<u32, wasmi::Error> {
                    site.with_table(&mut caller, "js_string_length", 0, |table| {
                        table.string_length(Handle::from_raw(handle))
                    })
                },
            )
            .map_err(link_err("js_string_length"))?;

        let site = self.site.clone();
        linker
            .func_wrap(
                module,
                "js_buf_length",
                move |mut caller: Caller<'_, S>, handle: i32| -> Result<u32, wasmi::Error> {
                    site.with_table(&mut caller, "js_buf_length", 0, |table| {
                        table.buf_length(Handle::from_raw(handle))
                    })
                },
            )
            .map_err(link_err("js_buf_length"))?;

        // Freeing never fails; missing handles are ignored.
        linker
            .func_wrap(
                module,
                "js_free_object",
                |mut caller: Caller<'_, S>, handle: i32| {
                    caller
                        .data_mut()
                        .handle_table()
                        .free_object(Handle::from_raw(handle));
                },
            )
            .map_err(link_err("js_free_object"))?;

        // ------------------------------------------------------------------
        // Field reads
        // ------------------------------------------------------------------

        let site = self.site.clone();
        linker
            .func_wrap(
                module,
                "js_have_field",
                move |mut caller: Caller<'_, S>,
                      handle: i32,
                      name_ptr: u32,
                      name_len: u32|
                      -> Result<i32, wasmi::Error> {
                    site.with_memory(&mut caller, "js_have_field", 0, |mem, table| {
                        table
                            .have_field(mem, Handle::from_raw(handle), name_ptr, name_len)
                            .map(i32::from)
                    })
                },
            )
            .map_err(link_err("js_have_field"))?;

        let site = self.site.clone();
        linker
            .func_wrap(
                module,
                "js_field_f32",
                move |mut caller: Caller<'_, S>,
                      handle: i32,
                      name_ptr: u32,
                      name_len: u32|
                      -> Result<f32, wasmi::Error> {
                    site.with_memory(&mut caller, "js_field_f32", 0.0, |mem, table| {
                        table.field_f32(mem, Handle::from_raw(handle), name_ptr, name_len)
                    })
                },
            )
            .map_err(link_err("js_field_f32"))?;

        let site = self.site.clone();
        linker
            .func_wrap(
                module,
                "js_field_u32",
                move |mut caller: Caller<'_, S>,
                      handle: i32,
                      name_ptr: u32,
                      name_len: u32|
                      -> Result<u32, wasmi::Error> {
                    site.with_memory(&mut caller, "js_field_u32", 0, |mem, table| {
                        table.field_u32(mem, Handle::from_raw(handle), name_ptr, name_len)
                    })
                },
            )
            .map_err(link_err("js_field_u32"))?;

        let site = self.site.clone();
        linker
            .func_wrap(
                module,
                "js_field",
                move |mut caller: Caller<'_, S>,
                      handle: i32,
                      name_ptr: u32,
                      name_len: u32|
                      -> Result<i32, wasmi::Error> {
                    site.with_memory(&mut caller, "js_field", UNDEFINED, |mem, table| {
                        table
                            .field(mem, Handle::from_raw(handle), name_ptr, name_len)
                            .map(i32::from)
                    })
                },
            )
            .map_err(link_err("js_field"))?;

        let site = self.site.clone();
        linker
            .func_wrap(
                module,
                "js_field_num",
                move |mut caller: Caller<'_, S>,
                      handle: i32,
                      name_ptr: u32,
                      name_len: u32|
                      -> Result<f64, wasmi::Error> {
                    site.with_memory(&mut caller, "js_field_num", 0.0, |mem, table| {
                        table.field_num(mem, Handle::from_raw(handle), name_ptr, name_len)
                    })
                },
            )
            .map_err(link_err("js_field_num"))?;

        tracing::debug!(module, "jsutils imports defined");
        Ok(())
    }
}
