//! Value shapes shared by binding and extraction.

use std::ops::Deref;

use rusqlite::ffi;

use crate::bind::{Bind, Binder};
use crate::error::Result;
use crate::extract::{Extract, Fields};

/// Marker for "no value".
///
/// Bound as NULL. As an output it skips its column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Null;

/// Owned bytes bound as a BLOB rather than TEXT.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Blob(pub Vec<u8>);

/// Borrowed bytes bound as a BLOB rather than TEXT.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BlobView<'a>(pub &'a [u8]);

impl Blob {
    pub fn as_view(&self) -> BlobView<'_> {
        BlobView(&self.0)
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl Deref for Blob {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for BlobView<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.0
    }
}

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Blob(bytes)
    }
}

impl From<&[u8]> for Blob {
    fn from(bytes: &[u8]) -> Self {
        Blob(bytes.to_vec())
    }
}

impl From<String> for Blob {
    fn from(text: String) -> Self {
        Blob(text.into_bytes())
    }
}

impl From<&str> for Blob {
    fn from(text: &str) -> Self {
        Blob(text.as_bytes().to_vec())
    }
}

impl<'a> From<&'a [u8]> for BlobView<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        BlobView(bytes)
    }
}

impl<'a> From<&'a str> for BlobView<'a> {
    fn from(text: &'a str) -> Self {
        BlobView(text.as_bytes())
    }
}

impl PartialEq<[u8]> for Blob {
    fn eq(&self, other: &[u8]) -> bool {
        self.0 == other
    }
}

impl PartialEq<[u8]> for BlobView<'_> {
    fn eq(&self, other: &[u8]) -> bool {
        self.0 == other
    }
}

/// A value of any storage class.
///
/// Extracted according to the column's storage class, and bound as the
/// matching native type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Bind for Value {
    fn bind<'a>(&'a self, out: &mut Binder<'a>) -> Result<()> {
        match self {
            Value::Null => out.null(),
            Value::Integer(i) => out.int64(*i),
            Value::Real(f) => out.double(*f),
            Value::Text(s) => out.text(s),
            Value::Blob(b) => out.blob(b),
        }
    }
}

impl<'r> Extract<'r> for Value {
    /// Typed by the storage class of the value.
    fn extract(fields: &mut Fields<'r>) -> Result<Self> {
        Ok(match fields.value_type()? {
            ffi::SQLITE_INTEGER => Value::Integer(fields.int64()?),
            ffi::SQLITE_FLOAT => Value::Real(fields.double()?),
            ffi::SQLITE_TEXT => Value::Text(fields.text()?.to_owned()),
            ffi::SQLITE_BLOB => Value::Blob(fields.blob()?.to_vec()),
            _ => {
                fields.skip()?;
                Value::Null
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_from_text() {
        let blob = Blob::from("hello");
        assert_eq!(&*blob, b"hello");
        assert_eq!(blob.as_view(), BlobView::from("hello"));
        assert_eq!(blob.into_inner(), b"hello".to_vec());
    }
}
