use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use hostlua::receiver::{self, Identity, ReceiverHandler};
use hostlua::{BufferedHost, Context, Engine, Error, Kind, Session, Value};

/// Host objects with a public `Var`, a `hidden` field that scripts cannot
/// see, and a few methods.
#[derive(Default)]
struct TestReceiver {
    next_id: AtomicU64,
    objects: Mutex<HashMap<u64, Object>>,
}

struct Object {
    var: String,
    #[allow(dead_code)]
    hidden: i64,
}

impl ReceiverHandler for TestReceiver {
    fn new_instance(&self, _: &Session, _: Identity, args: Value) -> Option<Identity> {
        let first = args.get_by_index(0).ok()?;
        let var = match first.kind() {
            Kind::Bool => return None,
            Kind::String => first.as_string(),
            _ => "Foo".to_owned(),
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.objects
            .lock()
            .unwrap()
            .insert(id, Object { var, hidden: 42 });
        Some(Identity::new(id))
    }

    fn get(&self, session: &Session, identity: Identity, member: &str) -> Option<Value> {
        match member {
            "Var" => {
                let objects = self.objects.lock().unwrap();
                let var = objects.get(&identity.token())?.var.clone();
                drop(objects);
                session.create_scalar(var).ok()
            }
            "Off" => session.create_scalar(false).ok(),
            "Nothing" => Some(session.create_null()),
            _ => None,
        }
    }

    fn set(&self, _: &Session, identity: Identity, member: &str, value: Value) {
        if member == "Var" {
            if let Some(obj) = self.objects.lock().unwrap().get_mut(&identity.token()) {
                obj.var = value.as_string();
            }
        }
    }

    fn exists(&self, _: &Session, _: Identity, member: &str) -> bool {
        matches!(member, "Var" | "Off" | "Nothing")
    }

    fn call(&self, session: &Session, _: Identity, method: &str, args: Value) -> Option<Value> {
        let arg = args.get_by_index(0).ok()?.as_string();
        match method {
            "Kind" => session.create_scalar(args.kind().name()).ok(),
            "Hello" => session.create_scalar(format!("Hello {arg}")).ok(),
            "Goodbye" => session.create(vec!["Goodbye".to_owned(), arg]).ok(),
            "Count" => session.create_scalar(args.size() as i64).ok(),
            "Third" => args.get_by_index(2).ok(),
            _ => None,
        }
    }
}

/// Objects that only report the identity they were reached with.
struct Origin;

impl ReceiverHandler for Origin {
    fn get(&self, session: &Session, identity: Identity, _: &str) -> Option<Value> {
        session.create_scalar(identity.token() as i64).ok()
    }

    fn set(&self, _: &Session, _: Identity, _: &str, _: Value) {}

    fn exists(&self, _: &Session, _: Identity, member: &str) -> bool {
        member == "Origin"
    }

    fn call(&self, _: &Session, _: Identity, _: &str, _: Value) -> Option<Value> {
        None
    }
}

fn define_test_receiver(name: &str) {
    receiver::define(name, Identity::new(0), Arc::new(TestReceiver::default())).unwrap();
}

/// Evaluate `script` and return what it printed.
fn output_of(ctx: &Context<'_>, host: &BufferedHost, script: &str) -> String {
    ctx.eval(script)
        .unwrap_or_else(|e| panic!("eval({script:?}): {e}"));
    host.take_output()
}

#[test]
fn receiver_script_surface() {
    define_test_receiver("TestReceiver");

    let engine = Engine::init().unwrap();
    let host = Rc::new(BufferedHost::new());
    let ctx = Context::new(&engine, host.clone()).unwrap();

    let cases = [
        ("local t = TestReceiver() echo(type(t))", "userdata"),
        ("local t = TestReceiver() echo(t.Var)", "Foo"),
        ("local t = TestReceiver.new() echo(t.Var)", "Foo"),
        ("local t = TestReceiver('wow') echo(t.Var)", "wow"),
        ("local t = TestReceiver() t.Var = 'Bar' echo(t.Var)", "Bar"),
        ("local t = TestReceiver() echo(exists(t, 'hidden') and 1 or 0)", "0"),
        ("local t = TestReceiver() t.hello = 'wow' echo(exists(t, 'hello') and 1 or 0)", "0"),
        ("local t = TestReceiver() echo(tostring(t:Ignore()))", "nil"),
        ("local t = TestReceiver() echo(t:Hello('World'))", "Hello World"),
        ("local t = TestReceiver() local r = t:Goodbye('Doge') echo(r[1], ',', r[2])", "Goodbye,Doge"),
        ("local t = TestReceiver() echo(tostring(t:invalid()))", "nil"),
        ("local t = TestReceiver() echo(t.Var and 1 or 0)", "1"),
        ("local t = TestReceiver() echo(t:Count(1, 2, 3))", "3"),
        ("local t = TestReceiver() echo(t.Count(1, 2))", "2"),
    ];

    for (script, expected) in cases {
        assert_eq!(output_of(&ctx, &host, script), expected, "script: {script}");
    }

    ctx.destroy();
    assert!(receiver::destroy("TestReceiver"));
}

#[test]
fn duplicate_definition_fails() {
    define_test_receiver("DuplicateReceiver");
    let err = receiver::define(
        "DuplicateReceiver",
        Identity::new(0),
        Arc::new(TestReceiver::default()),
    )
    .unwrap_err();
    assert!(matches!(err, Error::DuplicateReceiver(name) if name == "DuplicateReceiver"));
    assert!(receiver::destroy("DuplicateReceiver"));
    // second destroy is a no-op
    assert!(!receiver::destroy("DuplicateReceiver"));
}

#[test]
fn failed_construction_is_catchable() {
    define_test_receiver("RejectingReceiver");

    let engine = Engine::init().unwrap();
    let host = Rc::new(BufferedHost::new());
    let ctx = Context::new(&engine, host.clone()).unwrap();

    let out = output_of(
        &ctx,
        &host,
        "local ok, err = pcall(RejectingReceiver, false) echo(tostring(ok), ' ', tostring(err))",
    );
    assert!(out.starts_with("false "), "{out}");
    assert!(
        out.contains("failed to instantiate method receiver 'RejectingReceiver'"),
        "{out}"
    );

    // uncaught, it is an execution failure
    assert!(matches!(
        ctx.eval("RejectingReceiver(true)"),
        Err(Error::Execution(_))
    ));

    ctx.destroy();
    receiver::destroy("RejectingReceiver");
}

#[test]
fn exists_modes_from_script() {
    define_test_receiver("ExistsReceiver");

    let engine = Engine::init().unwrap();
    let host = Rc::new(BufferedHost::new());
    let ctx = Context::new(&engine, host.clone()).unwrap();
    ctx.eval("t = ExistsReceiver()").unwrap();

    let check = |member: &str, mode: i64| -> bool {
        ctx.eval(&format!("exists(t, '{member}', {mode})"))
            .unwrap()
            .value()
            .unwrap()
            .as_bool()
    };

    // present and falsy
    assert!(check("Off", 2));
    assert!(!check("Off", 1));
    assert!(check("Off", 0));
    // present and null
    assert!(check("Nothing", 2));
    assert!(!check("Nothing", 0));
    // absent
    for mode in 0..=2 {
        assert!(!check("Missing", mode));
    }
    // default mode is 2
    assert!(ctx
        .eval("exists(t, 'Off')")
        .unwrap()
        .value()
        .unwrap()
        .as_bool());
    assert!(matches!(ctx.eval("exists(t, 'Off', 9)"), Err(Error::Execution(_))));

    // plain tables
    assert!(check_table(&ctx, "exists({a = false}, 'a', 2)"));
    assert!(!check_table(&ctx, "exists({a = false}, 'a', 1)"));
    assert!(!check_table(&ctx, "exists({}, 'a')"));

    ctx.destroy();
    receiver::destroy("ExistsReceiver");
}

fn check_table(ctx: &Context<'_>, src: &str) -> bool {
    ctx.eval(src).unwrap().value().unwrap().as_bool()
}

#[test]
fn redefined_class_uses_new_identity() {
    receiver::define("Foo", Identity::new(1), Arc::new(Origin)).unwrap();

    let engine = Engine::init().unwrap();
    let host = Rc::new(BufferedHost::new());
    let ctx = Context::new(&engine, host).unwrap();

    let origin = |ctx: &Context<'_>| ctx.eval("Foo().Origin").unwrap().value().unwrap().as_long();
    assert_eq!(origin(&ctx), 1);
    let old = ctx.eval("old = Foo() return old").unwrap();
    assert!(old.is_ok());

    assert!(receiver::destroy("Foo"));
    assert!(ctx
        .eval("Foo == nil")
        .unwrap()
        .value()
        .unwrap()
        .as_bool());

    receiver::define("Foo", Identity::new(2), Arc::new(Origin)).unwrap();
    assert_eq!(origin(&ctx), 2);
    // instances created before the redefinition keep their identity
    assert_eq!(
        ctx.eval("old.Origin").unwrap().value().unwrap().as_long(),
        1
    );

    ctx.destroy();
    receiver::destroy("Foo");
}

#[test]
fn classes_defined_after_context_start_are_visible() {
    let engine = Engine::init().unwrap();
    let host = Rc::new(BufferedHost::new());
    let ctx = Context::new(&engine, host).unwrap();

    assert!(ctx
        .eval("LateReceiver == nil")
        .unwrap()
        .value()
        .unwrap()
        .as_bool());
    define_test_receiver("LateReceiver");
    assert_eq!(
        ctx.eval("LateReceiver('late').Var")
            .unwrap()
            .value()
            .unwrap()
            .as_string(),
        "late"
    );

    ctx.destroy();
    receiver::destroy("LateReceiver");
}

#[test]
fn instances_cross_the_bridge_as_objects() {
    define_test_receiver("BridgeReceiver");

    let engine = Engine::init().unwrap();
    let host = Rc::new(BufferedHost::new());
    let ctx = Context::new(&engine, host).unwrap();

    let obj = ctx.eval("BridgeReceiver()").unwrap().value().unwrap();
    assert_eq!(obj.kind(), Kind::Object);
    assert_eq!(obj.size(), 0);
    assert!(obj.to_host().unwrap() == hostlua::HostValue::Object(Default::default()));
    assert_eq!(obj.as_string(), "BridgeReceiver instance");

    let class = ctx.eval("BridgeReceiver").unwrap().value().unwrap();
    assert_eq!(class.kind(), Kind::Object);
    assert_eq!(class.as_string(), "BridgeReceiver");

    ctx.destroy();
    receiver::destroy("BridgeReceiver");
}

#[test]
fn undeclared_members_read_as_methods() {
    define_test_receiver("OptionalReceiver");

    let engine = Engine::init().unwrap();
    let host = Rc::new(BufferedHost::new());
    let ctx = Context::new(&engine, host.clone()).unwrap();

    let cases = [
        ("local t = OptionalReceiver() echo(type(t.missing))", "function"),
        ("local t = OptionalReceiver() echo(t.missing == nil and 1 or 0)", "0"),
        ("local t = OptionalReceiver() echo(exists(t, 'missing') and 1 or 0)", "0"),
        ("local t = OptionalReceiver() echo(exists(t, 'Var') and 1 or 0)", "1"),
    ];
    for (script, expected) in cases {
        assert_eq!(output_of(&ctx, &host, script), expected, "script: {script}");
    }

    ctx.destroy();
    receiver::destroy("OptionalReceiver");
}

#[test]
fn nil_arguments_stay_positional() {
    define_test_receiver("HoleReceiver");

    let engine = Engine::init().unwrap();
    let host = Rc::new(BufferedHost::new());
    let ctx = Context::new(&engine, host.clone()).unwrap();

    let cases = [
        ("local t = HoleReceiver() echo(t:Third(1, nil, 3))", "3"),
        ("local t = HoleReceiver() echo(t:Count(1, nil, 3))", "2"),
        ("local t = HoleReceiver() echo(t:Kind('a', nil, 'c'))", "map"),
        ("local t = HoleReceiver() echo(t:Kind('a', 'b', 'c'))", "list"),
    ];
    for (script, expected) in cases {
        assert_eq!(output_of(&ctx, &host, script), expected, "script: {script}");
    }

    ctx.destroy();
    receiver::destroy("HoleReceiver");
}
