//! Custom scalar SQL functions.
//!
//! Functions live in a process-wide registry and are installed on every
//! connection opened after they were registered. Arguments are read with
//! [`Extract`] and the result is written with [`Bind`].

use std::ffi::CString;
use std::os::raw::{c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::slice;
use std::sync::Arc;

use parking_lot::RwLock;
use rusqlite::ffi;

use crate::bind::{Bind, Binder};
use crate::error::{check, Result};
use crate::extract::{Extract, Fields};

type Call = dyn Fn(&mut Fields<'_>, &mut Binder<'_>) -> Result<()> + Send + Sync;

struct Registered {
    name: CString,
    arity: c_int,
    call: Box<Call>,
}

static FUNCTIONS: RwLock<Vec<Arc<Registered>>> = RwLock::new(Vec::new());

/// A Rust callable usable as a scalar SQL function.
///
/// Implemented for `Fn(A1, .., An) -> R` with up to six arguments, where every
/// argument is [`Extract`] and the result is [`Bind`].
pub trait ScalarFunction<Args>: Send + Sync + 'static {
    const ARITY: usize;

    fn invoke(&self, args: &mut Fields<'_>, out: &mut Binder<'_>) -> Result<()>;
}

macro_rules! count {
    () => { 0 };
    ($head:ident $($tail:ident)*) => { 1 + count!($($tail)*) };
}

macro_rules! scalar_function {
    ($($arg:ident $value:ident),*) => {
        impl<Func, Ret, $($arg),*> ScalarFunction<($($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> Ret + Send + Sync + 'static,
            Ret: Bind,
            $($arg: for<'r> Extract<'r>,)*
        {
            const ARITY: usize = count!($($arg)*);

            #[allow(unused_variables)]
            fn invoke(&self, args: &mut Fields<'_>, out: &mut Binder<'_>) -> Result<()> {
                $(let $value = $arg::extract(args)?;)*
                let result = (self)($($value),*);
                out.copied(|out| result.bind(out))
            }
        }
    };
}

scalar_function!();
scalar_function!(A a1);
scalar_function!(A a1, B a2);
scalar_function!(A a1, B a2, C a3);
scalar_function!(A a1, B a2, C a3, D a4);
scalar_function!(A a1, B a2, C a3, D a4, E a5);
scalar_function!(A a1, B a2, C a3, D a4, E a5, F a6);

/// Register `function` under `name` for every connection opened from now on.
///
/// Registering the same name and arity again replaces the earlier function
/// for later connections.
///
/// ```
/// litekit::create_function("increment", |x: i64| x + 1)?;
/// # Ok::<_, litekit::LiteError>(())
/// ```
pub fn create_function<Args, F>(name: &str, function: F) -> Result<()>
where
    F: ScalarFunction<Args>,
{
    let name = CString::new(name)?;
    let arity = F::ARITY as c_int;
    let call: Box<Call> = Box::new(move |args: &mut Fields<'_>, out: &mut Binder<'_>| {
        function.invoke(args, out)
    });

    tracing::debug!(target: "litekit", name = ?name, arity, "registering function");
    let mut functions = FUNCTIONS.write();
    functions.retain(|f| !(f.name == name && f.arity == arity));
    functions.push(Arc::new(Registered { name, arity, call }));
    Ok(())
}

/// Install every registered function on a fresh connection.
pub(crate) fn install_all(db: NonNull<ffi::sqlite3>) -> Result<()> {
    let functions = FUNCTIONS.read();
    for function in functions.iter() {
        install(db, function)?;
    }
    Ok(())
}

fn install(db: NonNull<ffi::sqlite3>, function: &Arc<Registered>) -> Result<()> {
    // The connection owns one reference, released by `release_function`
    // (also on failure).
    let data = Arc::into_raw(Arc::clone(function)) as *mut c_void;
    let rc = unsafe {
        ffi::sqlite3_create_function_v2(
            db.as_ptr(),
            function.name.as_ptr(),
            function.arity,
            ffi::SQLITE_UTF8,
            data,
            Some(call_function),
            None,
            None,
            Some(release_function),
        )
    };
    check(rc)
}

unsafe extern "C" fn call_function(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) {
    let Some(ctx) = NonNull::new(ctx) else {
        return;
    };
    let function = &*(ffi::sqlite3_user_data(ctx.as_ptr()) as *const Registered);
    let args: &[*mut ffi::sqlite3_value] = if argv.is_null() || argc <= 0 {
        &[]
    } else {
        slice::from_raw_parts(argv, argc as usize)
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut fields = unsafe { Fields::arguments(args) };
        let mut out = Binder::function_result(ctx);
        (function.call)(&mut fields, &mut out)
    }));

    let message = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!("function {:?} panicked", function.name),
    };
    tracing::debug!(target: "litekit", name = ?function.name, %message, "function failed");
    ffi::sqlite3_result_error(ctx.as_ptr(), message.as_ptr().cast(), message.len() as c_int);
}

unsafe extern "C" fn release_function(data: *mut c_void) {
    if !data.is_null() {
        drop(Arc::from_raw(data as *const Registered));
    }
}
