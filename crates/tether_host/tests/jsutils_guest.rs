//! End-to-end tests: WAT guests calling the `js_*` imports through wasmi.

use tether_core::{Handle, HandlePolicy, HandleTable, Object, Value};
use tether_host::{BridgeConfig, ErrorPolicy, JsUtils, PluginLoader};
use wasmi::{Engine, Instance, Linker, Memory, Module, Store, WasmParams, WasmResults};

const GUEST: &str = r#"
(module
  (import "env" "js_create_string" (func $create_string (param i32 i32) (result i32)))
  (import "env" "js_create_buffer" (func $create_buffer (param i32 i32) (result i32)))
  (import "env" "js_create_object" (func $create_object (result i32)))
  (import "env" "js_set_field_f32" (func $set_field_f32 (param i32 i32 i32 f32)))
  (import "env" "js_set_field_u32" (func $set_field_u32 (param i32 i32 i32 i32)))
  (import "env" "js_set_field_string" (func $set_field_string (param i32 i32 i32 i32 i32)))
  (import "env" "js_unwrap_to_str" (func $unwrap_to_str (param i32 i32 i32)))
  (import "env" "js_unwrap_to_buf" (func $unwrap_to_buf (param i32 i32 i32)))
  (import "env" "js_string_length" (func $string_length (param i32) (result i32)))
  (import "env" "js_buf_length" (func $buf_length (param i32) (result i32)))
  (import "env" "js_free_object" (func $free_object (param i32)))
  (import "env" "js_have_field" (func $have_field (param i32 i32 i32) (result i32)))
  (import "env" "js_field_f32" (func $field_f32 (param i32 i32 i32) (result f32)))
  (import "env" "js_field_u32" (func $field_u32 (param i32 i32 i32) (result i32)))
  (import "env" "js_field" (func $field (param i32 i32 i32) (result i32)))
  (import "env" "js_field_num" (func $field_num (param i32 i32 i32) (result f64)))

  (memory (export "memory") 1)

  ;; Host imports need a calling instance to find guest memory, so each one
  ;; is reached through a guest function rather than re-exported directly.
  (func (export "create_string") (param i32 i32) (result i32)
    (call $create_string (local.get 0) (local.get 1)))
  (func (export "create_buffer") (param i32 i32) (result i32)
    (call $create_buffer (local.get 0) (local.get 1)))
  (func (export "create_object") (result i32)
    (call $create_object))
  (func (export "set_field_f32") (param i32 i32 i32 f32)
    (call $set_field_f32 (local.get 0) (local.get 1) (local.get 2) (local.get 3)))
  (func (export "set_field_u32") (param i32 i32 i32 i32)
    (call $set_field_u32 (local.get 0) (local.get 1) (local.get 2) (local.get 3)))
  (func (export "set_field_string") (param i32 i32 i32 i32 i32)
    (call $set_field_string
      (local.get 0) (local.get 1) (local.get 2) (local.get 3) (local.get 4)))
  (func (export "unwrap_to_str") (param i32 i32 i32)
    (call $unwrap_to_str (local.get 0) (local.get 1) (local.get 2)))
  (func (export "unwrap_to_buf") (param i32 i32 i32)
    (call $unwrap_to_buf (local.get 0) (local.get 1) (local.get 2)))
  (func (export "string_length") (param i32) (result i32)
    (call $string_length (local.get 0)))
  (func (export "buf_length") (param i32) (result i32)
    (call $buf_length (local.get 0)))
  (func (export "free_object") (param i32)
    (call $free_object (local.get 0)))
  (func (export "have_field") (param i32 i32 i32) (result i32)
    (call $have_field (local.get 0) (local.get 1) (local.get 2)))
  (func (export "field_f32") (param i32 i32 i32) (result f32)
    (call $field_f32 (local.get 0) (local.get 1) (local.get 2)))
  (func (export "field_u32") (param i32 i32 i32) (result i32)
    (call $field_u32 (local.get 0) (local.get 1) (local.get 2)))
  (func (export "field") (param i32 i32 i32) (result i32)
    (call $field (local.get 0) (local.get 1) (local.get 2)))
  (func (export "field_num") (param i32 i32 i32) (result f64)
    (call $field_num (local.get 0) (local.get 1) (local.get 2)))

  ;; Push the string at (ptr, len) through the host and back into out.
  (func (export "echo") (param $ptr i32) (param $len i32) (param $out i32) (result i32)
    (local $h i32)
    (local $n i32)
    (local.set $h (call $create_string (local.get $ptr) (local.get $len)))
    (local.set $n (call $string_length (local.get $h)))
    (call $unwrap_to_str (local.get $h) (local.get $out) (local.get $n))
    (call $free_object (local.get $h))
    (local.get $n))
)
"#;

struct Guest {
    store: Store<HandleTable>,
    instance: Instance,
    memory: Memory,
    next_free: usize,
}

impl Guest {
    fn new(config: BridgeConfig) -> Self {
        Self::with_source(GUEST, config)
    }

    fn with_source(source: &str, config: BridgeConfig) -> Self {
        let engine = Engine::default();
        let module = Module::new(&engine, source.as_bytes()).unwrap();
        let mut store = Store::new(&engine, config.handle_table());

        let mut linker = <Linker<HandleTable>>::new(&engine);
        let mut loader = PluginLoader::new();
        loader.add_plugin(JsUtils::new(&config)).unwrap();
        loader.link(&mut linker).unwrap();

        let instance = linker
            .instantiate(&mut store, &module)
            .unwrap()
            .ensure_no_start(&mut store)
            .unwrap();
        let memory = instance.get_memory(&store, "memory").unwrap();

        Self {
            store,
            instance,
            memory,
            next_free: 16,
        }
    }

    /// Copy bytes into guest memory, returning (ptr, len).
    fn put(&mut self, bytes: &[u8]) -> (u32, u32) {
        let ptr = self.next_free;
        self.memory.write(&mut self.store, ptr, bytes).unwrap();
        self.next_free += bytes.len().max(1);
        (ptr as u32, bytes.len() as u32)
    }

    fn reserve(&mut self, len: usize) -> u32 {
        let ptr = self.next_free;
        self.next_free += len.max(1);
        ptr as u32
    }

    fn read(&self, ptr: u32, len: u32) -> Vec<u8> {
        let mut buf = vec![0; len as usize];
        self.memory.read(&self.store, ptr as usize, &mut buf).unwrap();
        buf
    }

    fn call<P: WasmParams, R: WasmResults>(&mut self, name: &str, params: P) -> Result<R, wasmi::Error> {
        let func = self.instance.get_typed_func::<P, R>(&self.store, name)?;
        func.call(&mut self.store, params)
    }

    fn table(&self) -> &HandleTable {
        self.store.data()
    }

    fn table_mut(&mut self) -> &mut HandleTable {
        self.store.data_mut()
    }
}

#[test]
fn test_string_round_trip_through_guest() {
    let mut guest = Guest::new(BridgeConfig::default());
    let text = "héllo, wörld 🦀";
    let (ptr, len) = guest.put(text.as_bytes());

    let handle: i32 = guest.call("create_string", (ptr, len)).unwrap();
    let size: u32 = guest.call("string_length", handle).unwrap();
    assert_eq!(size as usize, text.len());

    let out = guest.reserve(size as usize);
    guest.call::<_, ()>("unwrap_to_str", (handle, out, size)).unwrap();
    assert_eq!(guest.read(out, size), text.as_bytes());
}

#[test]
fn test_echo_frees_its_handle() {
    let mut guest = Guest::new(BridgeConfig::default());
    let (ptr, len) = guest.put(b"ping");
    let out = guest.reserve(4);

    let n: i32 = guest.call("echo", (ptr, len, out)).unwrap();
    assert_eq!(n, 4);
    assert_eq!(guest.read(out, 4), b"ping");
    assert!(guest.table().is_empty());
}

#[test]
fn test_buffer_survives_guest_overwrite() {
    let mut guest = Guest::new(BridgeConfig::default());
    let (ptr, len) = guest.put(&[9, 8, 7, 6]);

    let handle: i32 = guest.call("create_buffer", (ptr, len)).unwrap();
    guest.memory.write(&mut guest.store, ptr as usize, &[0, 0, 0, 0]).unwrap();

    let size: u32 = guest.call("buf_length", handle).unwrap();
    assert_eq!(size, 4);
    let out = guest.reserve(4);
    guest.call::<_, ()>("unwrap_to_buf", (handle, out, size)).unwrap();
    assert_eq!(guest.read(out, 4), vec![9, 8, 7, 6]);
}

#[test]
fn test_object_fields() {
    let mut guest = Guest::new(BridgeConfig::default());
    let (x_ptr, x_len) = guest.put(b"x");
    let (speed_ptr, speed_len) = guest.put(b"speed");
    let (label_ptr, label_len) = guest.put(b"label");
    let (value_ptr, value_len) = guest.put(b"tether");
    let (missing_ptr, missing_len) = guest.put(b"missing");

    let object: i32 = guest.call("create_object", ()).unwrap();
    let has_missing: i32 = guest.call("have_field", (object, missing_ptr, missing_len)).unwrap();
    assert_eq!(has_missing, 0);

    guest.call::<_, ()>("set_field_u32", (object, x_ptr, x_len, 42u32)).unwrap();
    guest.call::<_, ()>("set_field_f32", (object, speed_ptr, speed_len, 1.25f32)).unwrap();
    guest
        .call::<_, ()>("set_field_string", (object, label_ptr, label_len, value_ptr, value_len))
        .unwrap();

    let has_x: i32 = guest.call("have_field", (object, x_ptr, x_len)).unwrap();
    let x: u32 = guest.call("field_u32", (object, x_ptr, x_len)).unwrap();
    let speed: f32 = guest.call("field_f32", (object, speed_ptr, speed_len)).unwrap();
    let speed_num: f64 = guest.call("field_num", (object, speed_ptr, speed_len)).unwrap();
    let absent: u32 = guest.call("field_u32", (object, missing_ptr, missing_len)).unwrap();
    assert_eq!(has_x, 1);
    assert_eq!(x, 42);
    assert_eq!(speed, 1.25);
    assert_eq!(speed_num, 1.25);
    assert_eq!(absent, 0);

    let label: i32 = guest.call("field", (object, label_ptr, label_len)).unwrap();
    let again: i32 = guest.call("field", (object, label_ptr, label_len)).unwrap();
    assert_ne!(label, again);
    assert_eq!(guest.table().text(Handle::from_raw(label)).unwrap(), "tether");
}

#[test]
fn test_field_sentinels_from_host_values() {
    let mut guest = Guest::new(BridgeConfig::default());
    let (parent_ptr, parent_len) = guest.put(b"parent");
    let (gone_ptr, gone_len) = guest.put(b"gone");
    let (child_ptr, child_len) = guest.put(b"child");
    let (depth_ptr, depth_len) = guest.put(b"depth");

    // Host code builds the object the guest will inspect.
    let config = Object::new()
        .with("parent", Value::Null)
        .with("gone", Value::Undefined)
        .with("child", Object::new().with("depth", 3u32));
    let handle = guest.table_mut().insert(config).unwrap().raw();

    let parent: i32 = guest.call("field", (handle, parent_ptr, parent_len)).unwrap();
    let gone: i32 = guest.call("field", (handle, gone_ptr, gone_len)).unwrap();
    assert_eq!(parent, -1);
    assert_eq!(gone, -2);

    let child: i32 = guest.call("field", (handle, child_ptr, child_len)).unwrap();
    let depth: u32 = guest.call("field_u32", (child, depth_ptr, depth_len)).unwrap();
    assert_eq!(depth, 3);
}

#[test]
fn test_handles_increase_and_free_shrinks_table() {
    let mut guest = Guest::new(BridgeConfig::default());
    let (ptr, len) = guest.put(b"abc");

    let a: i32 = guest.call("create_string", (ptr, len)).unwrap();
    let b: i32 = guest.call("create_buffer", (ptr, len)).unwrap();
    let c: i32 = guest.call("create_object", ()).unwrap();
    assert!(a >= 0 && a < b && b < c);
    assert_eq!(guest.table().len(), 3);

    guest.call::<_, ()>("free_object", b).unwrap();
    assert_eq!(guest.table().len(), 2);

    // Freeing again or freeing a sentinel does nothing.
    guest.call::<_, ()>("free_object", b).unwrap();
    guest.call::<_, ()>("free_object", -1).unwrap();
    assert_eq!(guest.table().len(), 2);

    let d: i32 = guest.call("create_object", ()).unwrap();
    assert!(d > c);
}

#[test]
fn test_trap_policy_traps_on_bad_handle() {
    let mut guest = Guest::new(BridgeConfig::default());
    let result: Result<u32, _> = guest.call("string_length", 1234);
    let err = result.unwrap_err();
    assert!(err.to_string().contains("js_string_length"), "{err}");
}

#[test]
fn test_trap_policy_traps_on_out_of_bounds_pointer() {
    let mut guest = Guest::new(BridgeConfig::default());
    let result: Result<i32, _> = guest.call("create_string", (65_530u32, 64u32));
    assert!(result.is_err());
    assert!(guest.table().is_empty());
}

#[test]
fn test_lenient_policy_returns_fallbacks() {
    let config = BridgeConfig {
        error_policy: ErrorPolicy::Lenient,
        ..BridgeConfig::default()
    };
    let mut guest = Guest::new(config);
    let (ptr, len) = guest.put(b"text");

    let length: u32 = guest.call("string_length", 99).unwrap();
    assert_eq!(length, 0);

    let text: i32 = guest.call("create_string", (ptr, len)).unwrap();
    let has: i32 = guest.call("have_field", (text, ptr, len)).unwrap();
    assert_eq!(has, 0);

    let handle: i32 = guest.call("create_string", (65_535u32, 8u32)).unwrap();
    assert_eq!(handle, Handle::UNDEFINED.raw());

    // A destination too small for the string is refused, not truncated.
    let out = guest.reserve(4);
    guest.memory.write(&mut guest.store, out as usize, b"____").unwrap();
    guest.call::<_, ()>("unwrap_to_str", (text, out, 2u32)).unwrap();
    assert_eq!(guest.read(out, 4), b"____");
}

#[test]
fn test_recycle_policy_through_guest() {
    let config = BridgeConfig {
        handle_policy: HandlePolicy::Recycle,
        ..BridgeConfig::default()
    };
    let mut guest = Guest::new(config);

    let first: i32 = guest.call("create_object", ()).unwrap();
    guest.call::<_, ()>("free_object", first).unwrap();
    let second: i32 = guest.call("create_object", ()).unwrap();

    assert_ne!(first, second);
    assert!(second >= 0);
    assert!(!guest.table().contains(Handle::from_raw(first)));
}

#[test]
fn test_custom_import_module() {
    let config = BridgeConfig {
        import_module: "jsutils".to_string(),
        ..BridgeConfig::default()
    };
    let source = GUEST.replace("\"env\"", "\"jsutils\"");
    let mut guest = Guest::with_source(&source, config);

    let handle: i32 = guest.call("create_object", ()).unwrap();
    assert_eq!(handle, 0);
}

#[test]
fn test_missing_memory_export_traps() {
    let source = r#"
        (module
          (import "env" "js_create_string" (func $create_string (param i32 i32) (result i32)))
          (import "env" "js_create_object" (func $create_object (result i32)))
          (memory 1)
          (func (export "make_string") (result i32)
            (call $create_string (i32.const 0) (i32.const 0)))
          (func (export "make_object") (result i32)
            (call $create_object)))
    "#;
    let config = BridgeConfig {
        error_policy: ErrorPolicy::Lenient,
        ..BridgeConfig::default()
    };

    let engine = Engine::default();
    let module = Module::new(&engine, source.as_bytes()).unwrap();
    let mut store = Store::new(&engine, config.handle_table());
    let mut linker = <Linker<HandleTable>>::new(&engine);
    let mut loader = PluginLoader::new();
    loader.add_plugin(JsUtils::new(&config)).unwrap();
    loader.link(&mut linker).unwrap();
    let instance = linker
        .instantiate(&mut store, &module)
        .unwrap()
        .ensure_no_start(&mut store)
        .unwrap();

    // Objects need no guest memory.
    let make_object = instance.get_typed_func::<(), i32>(&store, "make_object").unwrap();
    assert_eq!(make_object.call(&mut store, ()).unwrap(), 0);

    let make_string = instance.get_typed_func::<(), i32>(&store, "make_string").unwrap();
    let err = make_string.call(&mut store, ()).unwrap_err();
    assert!(err.to_string().contains("memory"), "{err}");
}
