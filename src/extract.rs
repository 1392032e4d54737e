//! Column extraction.
//!
//! [`Fields`] reads values left to right, either from the current row of a
//! statement or from the arguments of a custom SQL function call. Each
//! [`Extract`] implementation consumes exactly one position. Borrowed shapes
//! (`&str`, `&[u8]`, [`BlobView`]) point into engine memory and are only valid
//! for `'r`: until the cursor is advanced again, or for the duration of the
//! function call.

use std::marker::PhantomData;
use std::os::raw::c_int;
use std::ptr::NonNull;
use std::slice;

use rusqlite::ffi;

use crate::error::{LiteError, Result};
use crate::types::{Blob, BlobView, Null};

#[derive(Clone, Copy)]
enum Source<'r> {
    Row(NonNull<ffi::sqlite3_stmt>),
    Arguments(&'r [*mut ffi::sqlite3_value]),
}

/// A positional reader over one row or one argument list.
pub struct Fields<'r> {
    source: Source<'r>,
    index: usize,
    len: usize,
    _row: PhantomData<&'r ()>,
}

impl<'r> Fields<'r> {
    /// Read the current row of `stmt`.
    ///
    /// # Safety
    ///
    /// `stmt` must point at a row, and must not be stepped, reset or
    /// finalized during `'r`.
    pub(crate) unsafe fn row(stmt: NonNull<ffi::sqlite3_stmt>) -> Self {
        let len = ffi::sqlite3_column_count(stmt.as_ptr()) as usize;
        Self {
            source: Source::Row(stmt),
            index: 0,
            len,
            _row: PhantomData,
        }
    }

    /// Read the arguments of a function call.
    ///
    /// # Safety
    ///
    /// Every pointer must be a protected `sqlite3_value` valid for `'r`.
    pub(crate) unsafe fn arguments(args: &'r [*mut ffi::sqlite3_value]) -> Self {
        Self {
            source: Source::Arguments(args),
            index: 0,
            len: args.len(),
            _row: PhantomData,
        }
    }

    /// 0-based position of the next value.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of values in the row or argument list.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Storage class of the next value (`SQLITE_INTEGER`, `SQLITE_TEXT`, ...).
    pub fn value_type(&self) -> Result<c_int> {
        let index = self.position()?;
        Ok(unsafe {
            match self.source {
                Source::Row(stmt) => ffi::sqlite3_column_type(stmt.as_ptr(), index),
                Source::Arguments(args) => ffi::sqlite3_value_type(args[self.index]),
            }
        })
    }

    /// Whether the next value is SQL NULL.
    pub fn is_null(&self) -> Result<bool> {
        Ok(self.value_type()? == ffi::SQLITE_NULL)
    }

    /// Move past the next value without reading it.
    pub fn skip(&mut self) -> Result<()> {
        self.position()?;
        self.index += 1;
        Ok(())
    }

    pub fn int64(&mut self) -> Result<i64> {
        let index = self.position()?;
        let value = unsafe {
            match self.source {
                Source::Row(stmt) => ffi::sqlite3_column_int64(stmt.as_ptr(), index),
                Source::Arguments(args) => ffi::sqlite3_value_int64(args[self.index]),
            }
        };
        self.index += 1;
        Ok(value)
    }

    pub fn double(&mut self) -> Result<f64> {
        let index = self.position()?;
        let value = unsafe {
            match self.source {
                Source::Row(stmt) => ffi::sqlite3_column_double(stmt.as_ptr(), index),
                Source::Arguments(args) => ffi::sqlite3_value_double(args[self.index]),
            }
        };
        self.index += 1;
        Ok(value)
    }

    /// UTF-8 text, bounded by the engine's reported byte length.
    pub fn text(&mut self) -> Result<&'r str> {
        let column = self.index;
        let index = self.position()?;
        // The pointer must be fetched before the length.
        let bytes = unsafe {
            match self.source {
                Source::Row(stmt) => {
                    let ptr = ffi::sqlite3_column_text(stmt.as_ptr(), index);
                    let len = ffi::sqlite3_column_bytes(stmt.as_ptr(), index);
                    raw_bytes(ptr, len)
                }
                Source::Arguments(args) => {
                    let ptr = ffi::sqlite3_value_text(args[column]);
                    let len = ffi::sqlite3_value_bytes(args[column]);
                    raw_bytes(ptr, len)
                }
            }
        };
        self.index += 1;
        std::str::from_utf8(bytes).map_err(|source| LiteError::Utf8 { column, source })
    }

    pub fn blob(&mut self) -> Result<&'r [u8]> {
        let index = self.position()?;
        let bytes = unsafe {
            match self.source {
                Source::Row(stmt) => {
                    let ptr = ffi::sqlite3_column_blob(stmt.as_ptr(), index);
                    let len = ffi::sqlite3_column_bytes(stmt.as_ptr(), index);
                    raw_bytes(ptr.cast(), len)
                }
                Source::Arguments(args) => {
                    let ptr = ffi::sqlite3_value_blob(args[self.index]);
                    let len = ffi::sqlite3_value_bytes(args[self.index]);
                    raw_bytes(ptr.cast(), len)
                }
            }
        };
        self.index += 1;
        Ok(bytes)
    }

    fn position(&self) -> Result<c_int> {
        if self.index >= self.len {
            return Err(LiteError::ColumnMismatch {
                requested: self.index + 1,
                available: self.len,
            });
        }
        Ok(self.index as c_int)
    }
}

/// Build a slice from engine memory. NULL means empty.
///
/// # Safety
///
/// `ptr` must be null or valid for `len` bytes during `'r`.
unsafe fn raw_bytes<'r>(ptr: *const u8, len: c_int) -> &'r [u8] {
    if ptr.is_null() || len <= 0 {
        &[]
    } else {
        slice::from_raw_parts(ptr, len as usize)
    }
}

/// A value that can be read from one column or argument.
pub trait Extract<'r>: Sized {
    fn extract(fields: &mut Fields<'r>) -> Result<Self>;
}

macro_rules! extract_int {
    ($($ty:ty),*) => {$(
        impl<'r> Extract<'r> for $ty {
            fn extract(fields: &mut Fields<'r>) -> Result<Self> {
                let index = fields.index();
                let value = fields.int64()?;
                <$ty>::try_from(value).map_err(|_| LiteError::OutOfRange {
                    index,
                    value: i128::from(value),
                })
            }
        }
    )*};
}

extract_int!(i8, i16, i32, isize, u8, u16, u32, u64, usize);

impl<'r> Extract<'r> for i64 {
    #[inline]
    fn extract(fields: &mut Fields<'r>) -> Result<Self> {
        fields.int64()
    }
}

impl<'r> Extract<'r> for bool {
    fn extract(fields: &mut Fields<'r>) -> Result<Self> {
        Ok(fields.int64()? != 0)
    }
}

impl<'r> Extract<'r> for f64 {
    fn extract(fields: &mut Fields<'r>) -> Result<Self> {
        fields.double()
    }
}

impl<'r> Extract<'r> for f32 {
    fn extract(fields: &mut Fields<'r>) -> Result<Self> {
        Ok(fields.double()? as f32)
    }
}

impl<'r> Extract<'r> for &'r str {
    fn extract(fields: &mut Fields<'r>) -> Result<Self> {
        fields.text()
    }
}

impl<'r> Extract<'r> for String {
    fn extract(fields: &mut Fields<'r>) -> Result<Self> {
        fields.text().map(str::to_owned)
    }
}

impl<'r> Extract<'r> for &'r [u8] {
    fn extract(fields: &mut Fields<'r>) -> Result<Self> {
        fields.blob()
    }
}

impl<'r> Extract<'r> for Vec<u8> {
    fn extract(fields: &mut Fields<'r>) -> Result<Self> {
        fields.blob().map(<[u8]>::to_vec)
    }
}

impl<'r> Extract<'r> for Blob {
    fn extract(fields: &mut Fields<'r>) -> Result<Self> {
        fields.blob().map(|bytes| Blob(bytes.to_vec()))
    }
}

impl<'r> Extract<'r> for BlobView<'r> {
    fn extract(fields: &mut Fields<'r>) -> Result<Self> {
        fields.blob().map(BlobView)
    }
}

impl<'r> Extract<'r> for Null {
    fn extract(fields: &mut Fields<'r>) -> Result<Self> {
        fields.skip()?;
        Ok(Null)
    }
}

impl<'r, T: Extract<'r>> Extract<'r> for Option<T> {
    fn extract(fields: &mut Fields<'r>) -> Result<Self> {
        if fields.is_null()? {
            fields.skip()?;
            Ok(None)
        } else {
            T::extract(fields).map(Some)
        }
    }
}

/// A whole row, read as a tuple of [`Extract`] values.
pub trait FromRow<'r>: Sized {
    /// Number of columns the row must provide.
    const COLUMNS: usize;

    fn from_row(fields: &mut Fields<'r>) -> Result<Self>;
}

/// One caller-supplied output slot.
pub trait Output<'r> {
    type Value: Extract<'r>;

    fn store(self, value: Self::Value);
}

impl<'r, T: Extract<'r>> Output<'r> for &mut T {
    type Value = T;

    #[inline]
    fn store(self, value: T) {
        *self = value;
    }
}

impl<'r> Output<'r> for Null {
    type Value = Null;

    #[inline]
    fn store(self, _: Null) {}
}

/// A tuple of output slots, filled from one row.
pub trait Outputs<'r> {
    const COLUMNS: usize;

    /// Read the whole row first, then store; a failed read leaves every
    /// slot untouched.
    fn fill(self, fields: &mut Fields<'r>) -> Result<()>;
}

macro_rules! one {
    ($x:ident) => {
        1
    };
}

macro_rules! row_tuple {
    ($($ty:ident $slot:ident $value:ident),+) => {
        impl<'r, $($ty: Extract<'r>),+> FromRow<'r> for ($($ty,)+) {
            const COLUMNS: usize = 0 $(+ one!($ty))+;

            fn from_row(fields: &mut Fields<'r>) -> Result<Self> {
                Ok(($($ty::extract(fields)?,)+))
            }
        }

        impl<'r, $($ty: Output<'r>),+> Outputs<'r> for ($($ty,)+) {
            const COLUMNS: usize = 0 $(+ one!($ty))+;

            fn fill(self, fields: &mut Fields<'r>) -> Result<()> {
                let ($($slot,)+) = self;
                let ($($value,)+) = <($($ty::Value,)+) as FromRow<'r>>::from_row(fields)?;
                $($slot.store($value);)+
                Ok(())
            }
        }
    };
}

row_tuple!(A a1 v1);
row_tuple!(A a1 v1, B a2 v2);
row_tuple!(A a1 v1, B a2 v2, C a3 v3);
row_tuple!(A a1 v1, B a2 v2, C a3 v3, D a4 v4);
row_tuple!(A a1 v1, B a2 v2, C a3 v3, D a4 v4, E a5 v5);
row_tuple!(A a1 v1, B a2 v2, C a3 v3, D a4 v4, E a5 v5, F a6 v6);
row_tuple!(A a1 v1, B a2 v2, C a3 v3, D a4 v4, E a5 v5, F a6 v6, G a7 v7);
row_tuple!(A a1 v1, B a2 v2, C a3 v3, D a4 v4, E a5 v5, F a6 v6, G a7 v7, H a8 v8);
row_tuple!(A a1 v1, B a2 v2, C a3 v3, D a4 v4, E a5 v5, F a6 v6, G a7 v7, H a8 v8, I a9 v9);
row_tuple!(A a1 v1, B a2 v2, C a3 v3, D a4 v4, E a5 v5, F a6 v6, G a7 v7, H a8 v8, I a9 v9, J a10 v10);
row_tuple!(A a1 v1, B a2 v2, C a3 v3, D a4 v4, E a5 v5, F a6 v6, G a7 v7, H a8 v8, I a9 v9, J a10 v10, K a11 v11);
row_tuple!(A a1 v1, B a2 v2, C a3 v3, D a4 v4, E a5 v5, F a6 v6, G a7 v7, H a8 v8, I a9 v9, J a10 v10, K a11 v11, L a12 v12);
