//! Parameter binding.
//!
//! Every bindable shape implements [`Bind`], which writes one value into a
//! [`Binder`] at its current position and moves to the next. Caller data
//! (text, blobs) is handed to the engine without copying: the cursor borrows
//! the parameters for `'a`, so the buffers outlive every step. Values produced
//! during binding (converter output, function results) are bound through
//! [`Binder::copied`], which makes the engine take a private copy.

use std::marker::PhantomData;
use std::os::raw::{c_int, c_uchar, c_void};
use std::ptr::NonNull;

use rusqlite::ffi;

use crate::error::{check, LiteError, Result};
use crate::types::{Blob, BlobView, Null};

#[derive(Debug, Clone, Copy)]
enum Sink {
    /// Positional parameters of a prepared statement.
    Parameter(NonNull<ffi::sqlite3_stmt>),
    /// The single result of a custom SQL function call.
    FunctionResult(NonNull<ffi::sqlite3_context>),
}

/// Destination for bound values.
///
/// `'a` is the lifetime of the data the engine may reference without copying.
pub struct Binder<'a> {
    sink: Sink,
    index: c_int,
    copy: bool,
    _data: PhantomData<&'a ()>,
}

impl<'a> Binder<'a> {
    /// Bind to the parameters of `stmt`, starting at `?1`.
    pub(crate) fn parameters(stmt: NonNull<ffi::sqlite3_stmt>) -> Self {
        Self {
            sink: Sink::Parameter(stmt),
            index: 1,
            copy: false,
            _data: PhantomData,
        }
    }

    /// Set the result of a function call. Always copies.
    pub(crate) fn function_result(ctx: NonNull<ffi::sqlite3_context>) -> Self {
        Self {
            sink: Sink::FunctionResult(ctx),
            index: 1,
            copy: true,
            _data: PhantomData,
        }
    }

    /// 1-based position of the next value.
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn int64(&mut self, value: i64) -> Result<()> {
        let rc = match self.sink {
            Sink::Parameter(stmt) => unsafe {
                ffi::sqlite3_bind_int64(stmt.as_ptr(), self.index, value)
            },
            Sink::FunctionResult(ctx) => {
                unsafe { ffi::sqlite3_result_int64(ctx.as_ptr(), value) };
                ffi::SQLITE_OK
            }
        };
        self.advance(rc)
    }

    pub fn double(&mut self, value: f64) -> Result<()> {
        let rc = match self.sink {
            Sink::Parameter(stmt) => unsafe {
                ffi::sqlite3_bind_double(stmt.as_ptr(), self.index, value)
            },
            Sink::FunctionResult(ctx) => {
                unsafe { ffi::sqlite3_result_double(ctx.as_ptr(), value) };
                ffi::SQLITE_OK
            }
        };
        self.advance(rc)
    }

    pub fn text(&mut self, value: &'a str) -> Result<()> {
        let ptr = value.as_ptr().cast();
        let len = value.len() as u64;
        let encoding = ffi::SQLITE_UTF8 as c_uchar;
        let rc = match self.sink {
            Sink::Parameter(stmt) => unsafe {
                ffi::sqlite3_bind_text64(
                    stmt.as_ptr(),
                    self.index,
                    ptr,
                    len,
                    self.destructor(),
                    encoding,
                )
            },
            Sink::FunctionResult(ctx) => {
                unsafe {
                    ffi::sqlite3_result_text64(ctx.as_ptr(), ptr, len, self.destructor(), encoding)
                };
                ffi::SQLITE_OK
            }
        };
        self.advance(rc)
    }

    pub fn blob(&mut self, value: &'a [u8]) -> Result<()> {
        let ptr = value.as_ptr() as *const c_void;
        let len = value.len() as u64;
        let rc = match self.sink {
            Sink::Parameter(stmt) => unsafe {
                ffi::sqlite3_bind_blob64(stmt.as_ptr(), self.index, ptr, len, self.destructor())
            },
            Sink::FunctionResult(ctx) => {
                unsafe { ffi::sqlite3_result_blob64(ctx.as_ptr(), ptr, len, self.destructor()) };
                ffi::SQLITE_OK
            }
        };
        self.advance(rc)
    }

    pub fn null(&mut self) -> Result<()> {
        let rc = match self.sink {
            Sink::Parameter(stmt) => unsafe { ffi::sqlite3_bind_null(stmt.as_ptr(), self.index) },
            Sink::FunctionResult(ctx) => {
                unsafe { ffi::sqlite3_result_null(ctx.as_ptr()) };
                ffi::SQLITE_OK
            }
        };
        self.advance(rc)
    }

    /// Bind values that live shorter than `'a`.
    ///
    /// Inside `f` the engine copies every text and blob, so the data only has
    /// to live for the duration of the call. The position is shared with
    /// `self`.
    pub fn copied<'b, R>(&mut self, f: impl FnOnce(&mut Binder<'b>) -> R) -> R {
        let mut inner = Binder {
            sink: self.sink,
            index: self.index,
            copy: true,
            _data: PhantomData,
        };
        let out = f(&mut inner);
        self.index = inner.index;
        out
    }

    fn destructor(&self) -> ffi::sqlite3_destructor_type {
        if self.copy {
            ffi::SQLITE_TRANSIENT()
        } else {
            ffi::SQLITE_STATIC()
        }
    }

    fn advance(&mut self, rc: c_int) -> Result<()> {
        check(rc)?;
        self.index += 1;
        Ok(())
    }

    fn out_of_range(&self, value: impl Into<i128>) -> LiteError {
        LiteError::OutOfRange {
            index: self.index(),
            value: value.into(),
        }
    }
}

/// A value that can be bound to one statement parameter.
pub trait Bind {
    fn bind<'a>(&'a self, out: &mut Binder<'a>) -> Result<()>;
}

macro_rules! bind_lossless_int {
    ($($ty:ty),*) => {$(
        impl Bind for $ty {
            #[inline]
            fn bind<'a>(&'a self, out: &mut Binder<'a>) -> Result<()> {
                out.int64(i64::from(*self))
            }
        }
    )*};
}

bind_lossless_int!(i8, i16, i32, i64, u8, u16, u32, bool);

macro_rules! bind_checked_int {
    ($($ty:ty),*) => {$(
        impl Bind for $ty {
            fn bind<'a>(&'a self, out: &mut Binder<'a>) -> Result<()> {
                let value = i64::try_from(*self).map_err(|_| out.out_of_range(*self as i128))?;
                out.int64(value)
            }
        }
    )*};
}

bind_checked_int!(isize, u64, usize);

impl Bind for f64 {
    fn bind<'a>(&'a self, out: &mut Binder<'a>) -> Result<()> {
        out.double(*self)
    }
}

impl Bind for f32 {
    fn bind<'a>(&'a self, out: &mut Binder<'a>) -> Result<()> {
        out.double(f64::from(*self))
    }
}

impl Bind for str {
    fn bind<'a>(&'a self, out: &mut Binder<'a>) -> Result<()> {
        out.text(self)
    }
}

impl Bind for String {
    fn bind<'a>(&'a self, out: &mut Binder<'a>) -> Result<()> {
        out.text(self.as_str())
    }
}

impl Bind for [u8] {
    fn bind<'a>(&'a self, out: &mut Binder<'a>) -> Result<()> {
        out.blob(self)
    }
}

impl Bind for Vec<u8> {
    fn bind<'a>(&'a self, out: &mut Binder<'a>) -> Result<()> {
        out.blob(self.as_slice())
    }
}

impl Bind for Blob {
    fn bind<'a>(&'a self, out: &mut Binder<'a>) -> Result<()> {
        out.blob(&self.0)
    }
}

impl Bind for BlobView<'_> {
    fn bind<'a>(&'a self, out: &mut Binder<'a>) -> Result<()> {
        out.blob(self.0)
    }
}

impl Bind for Null {
    fn bind<'a>(&'a self, out: &mut Binder<'a>) -> Result<()> {
        out.null()
    }
}

impl<T: Bind> Bind for Option<T> {
    fn bind<'a>(&'a self, out: &mut Binder<'a>) -> Result<()> {
        match self {
            Some(value) => value.bind(out),
            None => out.null(),
        }
    }
}

impl<T: Bind + ?Sized> Bind for &T {
    fn bind<'a>(&'a self, out: &mut Binder<'a>) -> Result<()> {
        (**self).bind(out)
    }
}

/// A full argument list, bound left to right from `?1`.
pub trait Params {
    fn bind_all<'a>(&'a self, out: &mut Binder<'a>) -> Result<()>;
}

impl Params for () {
    fn bind_all<'a>(&'a self, _out: &mut Binder<'a>) -> Result<()> {
        Ok(())
    }
}

macro_rules! params_tuple {
    ($($name:ident),+) => {
        impl<$($name: Bind),+> Params for ($($name,)+) {
            #[allow(non_snake_case)]
            fn bind_all<'a>(&'a self, out: &mut Binder<'a>) -> Result<()> {
                let ($($name,)+) = self;
                $($name.bind(out)?;)+
                Ok(())
            }
        }
    };
}

params_tuple!(A);
params_tuple!(A, B);
params_tuple!(A, B, C);
params_tuple!(A, B, C, D);
params_tuple!(A, B, C, D, E);
params_tuple!(A, B, C, D, E, F);
params_tuple!(A, B, C, D, E, F, G);
params_tuple!(A, B, C, D, E, F, G, H);
params_tuple!(A, B, C, D, E, F, G, H, I);
params_tuple!(A, B, C, D, E, F, G, H, I, J);
params_tuple!(A, B, C, D, E, F, G, H, I, J, K);
params_tuple!(A, B, C, D, E, F, G, H, I, J, K, L);

impl<T: Bind> Params for [T] {
    fn bind_all<'a>(&'a self, out: &mut Binder<'a>) -> Result<()> {
        self.iter().try_for_each(|value| value.bind(out))
    }
}

impl<T: Bind, const N: usize> Params for [T; N] {
    fn bind_all<'a>(&'a self, out: &mut Binder<'a>) -> Result<()> {
        self.as_slice().bind_all(out)
    }
}

impl<T: Bind> Params for Vec<T> {
    fn bind_all<'a>(&'a self, out: &mut Binder<'a>) -> Result<()> {
        self.as_slice().bind_all(out)
    }
}
