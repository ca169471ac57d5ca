///
/// Bridge between Rust closures and the engine's user-defined routine hooks.
///
/// Three routine shapes are supported:
/// - Scalar functions: one call per row, `Fn(&S, &Arguments) -> Result<R>`
/// - Aggregates: seed, step and finalize over an accumulator of type `A`
/// - Collations: `Fn(&str, &str) -> Ordering`
///
/// Each installed routine gets a boxed slot as the engine's user-data
/// pointer; the engine frees it through `destroy` when the routine is
/// replaced, removed, or the connection closes.
///
/// Errors returned by a routine (and panics, which are caught at the
/// boundary) become the statement's error: the message is reported with
/// `sqlite3_result_error` and, for native errors, the status code with
/// `sqlite3_result_error_code`.
///
/// Aggregate accumulators live in the engine's per-execution aggregate
/// context. An error raised by a step is held until finalize; later steps of
/// that execution are skipped.
///

use std::any::Any;
use std::cmp::Ordering;
use std::ffi::{CString, c_void};
use std::mem;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::rc::Rc;
use std::slice;

use rusqlite::ffi;

use crate::error::{Result, SqliteError};
use crate::value::{ArgumentValues, BindContext, FromSql, RawValues, StorageClass, ToSql, Value, ValueRef};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionFlags {
    /// The function always returns the same result for the same arguments,
    /// letting the planner factor calls out and use it in indexes.
    pub deterministic: bool,
}

impl FunctionFlags {
    pub const DETERMINISTIC: Self = Self { deterministic: true };

    fn text_rep(&self) -> c_int {
        if self.deterministic {
            ffi::SQLITE_UTF8 | ffi::SQLITE_DETERMINISTIC
        } else {
            ffi::SQLITE_UTF8
        }
    }
}

/// The arguments of one routine invocation.
pub struct Arguments<'a> {
    values: ArgumentValues<'a>,
}

impl<'a> Arguments<'a> {
    unsafe fn from_raw(argc: c_int, argv: *mut *mut ffi::sqlite3_value) -> Self {
        let values: &'a [*mut ffi::sqlite3_value] = if argc <= 0 || argv.is_null() {
            &[]
        } else {
            unsafe { slice::from_raw_parts(argv, argc as usize) }
        };
        Self {
            values: ArgumentValues { values },
        }
    }

    pub fn len(&self) -> usize {
        self.values.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self, ordinal: usize) -> Result<()> {
        if ordinal >= self.len() {
            return Err(SqliteError::OutOfRange {
                parameter: "argument",
                index: ordinal,
                bound: self.len() as isize - 1,
            });
        }
        Ok(())
    }

    pub fn get<T: FromSql>(&self, ordinal: usize) -> Result<T> {
        self.check(ordinal)?;
        T::from_sql(ValueRef::native(&self.values, ordinal))
    }

    pub fn value(&self, ordinal: usize) -> Result<Value> {
        self.check(ordinal)?;
        Ok(ValueRef::native(&self.values, ordinal).to_value())
    }

    pub fn storage_class(&self, ordinal: usize) -> Result<StorageClass> {
        self.check(ordinal)?;
        Ok(self.values.class(ordinal))
    }

    pub fn is_null(&self, ordinal: usize) -> Result<bool> {
        Ok(self.storage_class(ordinal)? == StorageClass::Null)
    }

    pub fn values(&self) -> Vec<Value> {
        (0..self.len())
            .map(|ordinal| ValueRef::native(&self.values, ordinal).to_value())
            .collect()
    }
}

/// A routine that can be (re)installed on a native database handle.
pub(crate) trait NativeRoutine {
    fn name(&self) -> &str;

    /// Registers the routine on `db` and returns the engine status.
    fn install(&self, db: *mut ffi::sqlite3, bind: BindContext) -> c_int;
}

type ScalarCallback = dyn Fn(&Arguments<'_>, &BindContext) -> Result<Value>;
type CompareCallback = dyn Fn(&str, &str) -> Ordering;

pub(crate) struct ScalarFunction {
    name: String,
    arity: i32,
    flags: FunctionFlags,
    callback: Rc<ScalarCallback>,
}

impl ScalarFunction {
    pub(crate) fn new<S, R, F>(name: &str, arity: i32, flags: FunctionFlags, state: S, function: F) -> Self
    where
        S: 'static,
        R: ToSql,
        F: Fn(&S, &Arguments<'_>) -> Result<R> + 'static,
    {
        let callback = move |args: &Arguments<'_>, bind: &BindContext| function(&state, args)?.to_sql(bind);
        Self {
            name: name.to_string(),
            arity,
            flags,
            callback: Rc::new(callback),
        }
    }
}

struct ScalarSlot {
    name: String,
    callback: Rc<ScalarCallback>,
    bind: BindContext,
}

impl NativeRoutine for ScalarFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn install(&self, db: *mut ffi::sqlite3, bind: BindContext) -> c_int {
        let Ok(name) = CString::new(self.name.as_str()) else {
            return ffi::SQLITE_MISUSE;
        };
        let slot = Box::into_raw(Box::new(ScalarSlot {
            name: self.name.clone(),
            callback: Rc::clone(&self.callback),
            bind,
        }));
        unsafe {
            ffi::sqlite3_create_function_v2(
                db,
                name.as_ptr(),
                self.arity,
                self.flags.text_rep(),
                slot.cast(),
                Some(call_scalar),
                None,
                None,
                Some(destroy::<ScalarSlot>),
            )
        }
    }
}

struct AggregateCallbacks<A> {
    seed: A,
    step: Box<dyn Fn(A, &Arguments<'_>) -> Result<A>>,
    finalize: Box<dyn Fn(A, &BindContext) -> Result<Value>>,
}

pub(crate) struct AggregateFunction<A> {
    name: String,
    arity: i32,
    flags: FunctionFlags,
    callbacks: Rc<AggregateCallbacks<A>>,
}

impl<A: Clone + 'static> AggregateFunction<A> {
    pub(crate) fn new<R, S, F>(name: &str, arity: i32, flags: FunctionFlags, seed: A, step: S, finalize: F) -> Self
    where
        R: ToSql,
        S: Fn(A, &Arguments<'_>) -> Result<A> + 'static,
        F: Fn(A) -> Result<R> + 'static,
    {
        let finalize = move |accumulate: A, bind: &BindContext| finalize(accumulate)?.to_sql(bind);
        Self {
            name: name.to_string(),
            arity,
            flags,
            callbacks: Rc::new(AggregateCallbacks {
                seed,
                step: Box::new(step),
                finalize: Box::new(finalize),
            }),
        }
    }
}

struct AggregateSlot<A> {
    name: String,
    callbacks: Rc<AggregateCallbacks<A>>,
    bind: BindContext,
}

/// Per-execution state stored behind the engine's aggregate context.
struct Accumulator<A> {
    value: Option<A>,
    error: Option<SqliteError>,
}

impl<A: Clone + 'static> NativeRoutine for AggregateFunction<A> {
    fn name(&self) -> &str {
        &self.name
    }

    fn install(&self, db: *mut ffi::sqlite3, bind: BindContext) -> c_int {
        let Ok(name) = CString::new(self.name.as_str()) else {
            return ffi::SQLITE_MISUSE;
        };
        let slot = Box::into_raw(Box::new(AggregateSlot {
            name: self.name.clone(),
            callbacks: Rc::clone(&self.callbacks),
            bind,
        }));
        unsafe {
            ffi::sqlite3_create_function_v2(
                db,
                name.as_ptr(),
                self.arity,
                self.flags.text_rep(),
                slot.cast(),
                None,
                Some(aggregate_step::<A>),
                Some(aggregate_final::<A>),
                Some(destroy::<AggregateSlot<A>>),
            )
        }
    }
}

pub(crate) struct Collation {
    name: String,
    compare: Rc<CompareCallback>,
}

impl Collation {
    pub(crate) fn new<F>(name: &str, compare: F) -> Self
    where
        F: Fn(&str, &str) -> Ordering + 'static,
    {
        Self {
            name: name.to_string(),
            compare: Rc::new(compare),
        }
    }
}

struct CollationSlot {
    name: String,
    compare: Rc<CompareCallback>,
}

impl NativeRoutine for Collation {
    fn name(&self) -> &str {
        &self.name
    }

    fn install(&self, db: *mut ffi::sqlite3, _: BindContext) -> c_int {
        let Ok(name) = CString::new(self.name.as_str()) else {
            return ffi::SQLITE_MISUSE;
        };
        let slot = Box::into_raw(Box::new(CollationSlot {
            name: self.name.clone(),
            compare: Rc::clone(&self.compare),
        }));
        let rc = unsafe {
            ffi::sqlite3_create_collation_v2(
                db,
                name.as_ptr(),
                ffi::SQLITE_UTF8,
                slot.cast(),
                Some(compare_collation),
                Some(destroy::<CollationSlot>),
            )
        };
        if rc != ffi::SQLITE_OK {
            // the engine does not run the destructor when registration fails
            drop(unsafe { Box::from_raw(slot) });
        }
        rc
    }
}

/// Unregisters a scalar function or aggregate from `db`.
pub(crate) fn uninstall_function(db: *mut ffi::sqlite3, name: &str, arity: i32) -> c_int {
    let Ok(name) = CString::new(name) else {
        return ffi::SQLITE_MISUSE;
    };
    unsafe {
        ffi::sqlite3_create_function_v2(
            db,
            name.as_ptr(),
            arity,
            ffi::SQLITE_UTF8,
            ptr::null_mut(),
            None,
            None,
            None,
            None,
        )
    }
}

pub(crate) fn uninstall_collation(db: *mut ffi::sqlite3, name: &str) -> c_int {
    let Ok(name) = CString::new(name) else {
        return ffi::SQLITE_MISUSE;
    };
    unsafe {
        ffi::sqlite3_create_collation_v2(db, name.as_ptr(), ffi::SQLITE_UTF8, ptr::null_mut(), None, None)
    }
}

unsafe extern "C" fn destroy<T>(data: *mut c_void) {
    if !data.is_null() {
        drop(unsafe { Box::from_raw(data.cast::<T>()) });
    }
}

fn guard<T>(routine: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(routine, %message, "user routine panicked");
            Err(SqliteError::native(ffi::SQLITE_ERROR, message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "user routine panicked".to_string()
    }
}

unsafe fn set_result(ctx: *mut ffi::sqlite3_context, value: &Value) {
    unsafe {
        match value {
            Value::Null => ffi::sqlite3_result_null(ctx),
            Value::Integer(i) => ffi::sqlite3_result_int64(ctx, *i),
            Value::Real(r) => ffi::sqlite3_result_double(ctx, *r),
            Value::Text(text) => match c_int::try_from(text.len()) {
                Ok(len) => ffi::sqlite3_result_text(ctx, text.as_ptr().cast(), len, ffi::SQLITE_TRANSIENT()),
                Err(_) => ffi::sqlite3_result_error_toobig(ctx),
            },
            Value::Blob(bytes) if bytes.is_empty() => ffi::sqlite3_result_zeroblob(ctx, 0),
            Value::Blob(bytes) => match c_int::try_from(bytes.len()) {
                Ok(len) => ffi::sqlite3_result_blob(ctx, bytes.as_ptr().cast(), len, ffi::SQLITE_TRANSIENT()),
                Err(_) => ffi::sqlite3_result_error_toobig(ctx),
            },
        }
    }
}

unsafe fn report_error(ctx: *mut ffi::sqlite3_context, err: &SqliteError) {
    let message = err.message();
    let len = c_int::try_from(message.len()).unwrap_or(c_int::MAX);
    unsafe {
        ffi::sqlite3_result_error(ctx, message.as_ptr().cast(), len);
        if let Some(code) = err.native_code().filter(|code| *code != ffi::SQLITE_OK) {
            ffi::sqlite3_result_error_code(ctx, code);
        }
    }
}

unsafe extern "C" fn call_scalar(ctx: *mut ffi::sqlite3_context, argc: c_int, argv: *mut *mut ffi::sqlite3_value) {
    let slot = unsafe { &*(ffi::sqlite3_user_data(ctx) as *const ScalarSlot) };
    let args = unsafe { Arguments::from_raw(argc, argv) };
    match guard(&slot.name, || (slot.callback)(&args, &slot.bind)) {
        Ok(value) => unsafe { set_result(ctx, &value) },
        Err(err) => {
            tracing::trace!(function = %slot.name, error = %err, "scalar function failed");
            unsafe { report_error(ctx, &err) }
        }
    }
}

unsafe extern "C" fn aggregate_step<A: Clone + 'static>(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) {
    let slot = unsafe { &*(ffi::sqlite3_user_data(ctx) as *const AggregateSlot<A>) };
    let cell = unsafe {
        ffi::sqlite3_aggregate_context(ctx, mem::size_of::<*mut Accumulator<A>>() as c_int)
            as *mut *mut Accumulator<A>
    };
    if cell.is_null() {
        unsafe { ffi::sqlite3_result_error_nomem(ctx) };
        return;
    }
    if unsafe { (*cell).is_null() } {
        let fresh = Accumulator {
            value: Some(slot.callbacks.seed.clone()),
            error: None,
        };
        unsafe { *cell = Box::into_raw(Box::new(fresh)) };
    }
    let accumulator = unsafe { &mut **cell };
    if accumulator.error.is_some() {
        return;
    }
    let Some(current) = accumulator.value.take() else {
        return;
    };
    let args = unsafe { Arguments::from_raw(argc, argv) };
    match guard(&slot.name, || (slot.callbacks.step)(current, &args)) {
        Ok(next) => accumulator.value = Some(next),
        Err(err) => accumulator.error = Some(err),
    }
}

unsafe extern "C" fn aggregate_final<A: Clone + 'static>(ctx: *mut ffi::sqlite3_context) {
    let slot = unsafe { &*(ffi::sqlite3_user_data(ctx) as *const AggregateSlot<A>) };
    let cell = unsafe { ffi::sqlite3_aggregate_context(ctx, 0) as *mut *mut Accumulator<A> };
    let accumulator = if cell.is_null() || unsafe { (*cell).is_null() } {
        // no rows were stepped
        Accumulator {
            value: Some(slot.callbacks.seed.clone()),
            error: None,
        }
    } else {
        let boxed = unsafe { Box::from_raw(*cell) };
        unsafe { *cell = ptr::null_mut() };
        *boxed
    };

    let outcome = match (accumulator.error, accumulator.value) {
        (Some(err), _) => Err(err),
        (None, Some(value)) => guard(&slot.name, || (slot.callbacks.finalize)(value, &slot.bind)),
        (None, None) => Ok(Value::Null),
    };
    match outcome {
        Ok(value) => unsafe { set_result(ctx, &value) },
        Err(err) => {
            tracing::trace!(aggregate = %slot.name, error = %err, "aggregate failed");
            unsafe { report_error(ctx, &err) }
        }
    }
}

unsafe extern "C" fn compare_collation(
    data: *mut c_void,
    left_len: c_int,
    left: *const c_void,
    right_len: c_int,
    right: *const c_void,
) -> c_int {
    let slot = unsafe { &*(data as *const CollationSlot) };
    let left = unsafe { utf8_arg(left, left_len) };
    let right = unsafe { utf8_arg(right, right_len) };
    match panic::catch_unwind(AssertUnwindSafe(|| (slot.compare)(&left, &right))) {
        Ok(ordering) => ordering as c_int,
        Err(payload) => {
            tracing::error!(
                collation = %slot.name,
                message = %panic_message(payload.as_ref()),
                "collation panicked; treating operands as equal"
            );
            0
        }
    }
}

unsafe fn utf8_arg(data: *const c_void, len: c_int) -> String {
    if data.is_null() || len <= 0 {
        return String::new();
    }
    let bytes = unsafe { slice::from_raw_parts(data.cast::<u8>(), len as usize) };
    String::from_utf8_lossy(bytes).into_owned()
}
