//! User-defined type converters.
//!
//! A type becomes bindable by implementing [`Serialize`] (mapping it to a
//! [`Bind`] shape) and extractable by implementing [`Deserialize`] (building
//! it from an [`Extract`] shape). [`register_converter!`](crate::register_converter)
//! then wires those into the binding and extraction machinery:
//!
//! ```
//! use litekit::{register_converter, Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq)]
//! struct Celsius(f64);
//!
//! impl Serialize for Celsius {
//!     type Target = f64;
//!     fn serialize(&self) -> f64 {
//!         self.0
//!     }
//! }
//!
//! impl Deserialize for Celsius {
//!     type Source<'r> = f64;
//!     fn deserialize(value: f64) -> litekit::Result<Self> {
//!         Ok(Celsius(value))
//!     }
//! }
//!
//! register_converter!(Celsius);
//! ```
//!
//! A few converters come built in: [`Json`], `uuid::Uuid` (16-byte blob) and
//! `chrono::DateTime<Utc>` (RFC 3339 text).

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::bind::{Bind, Binder};
use crate::error::{LiteError, Result};
use crate::extract::{Extract, Fields};

/// Maps a value to a bindable shape.
pub trait Serialize {
    type Target: Bind;

    fn serialize(&self) -> Self::Target;
}

/// Builds a value from an extractable shape.
pub trait Deserialize: Sized {
    type Source<'r>: Extract<'r>;

    fn deserialize(source: Self::Source<'_>) -> Result<Self>;
}

/// Bind `value` through its [`Serialize`] target.
///
/// The target is a temporary, so the engine copies it.
#[doc(hidden)]
pub fn bind_serialized<'a, T>(value: &'a T, out: &mut Binder<'a>) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let target = value.serialize();
    out.copied(|out| target.bind(out))
}

#[doc(hidden)]
pub fn extract_deserialized<'r, T: Deserialize>(fields: &mut Fields<'r>) -> Result<T> {
    let source = <T::Source<'r> as Extract<'r>>::extract(fields)?;
    T::deserialize(source)
}

/// Implement [`Bind`] and/or [`Extract`] for a type with a
/// [`Serialize`]/[`Deserialize`] implementation.
///
/// `register_converter!(T)` registers both directions;
/// `register_converter!(serialize T)` and `register_converter!(deserialize T)`
/// register one.
#[macro_export]
macro_rules! register_converter {
    (serialize $ty:ty) => {
        impl $crate::Bind for $ty {
            fn bind<'a>(&'a self, out: &mut $crate::Binder<'a>) -> $crate::Result<()> {
                $crate::convert::bind_serialized(self, out)
            }
        }
    };
    (deserialize $ty:ty) => {
        impl<'r> $crate::Extract<'r> for $ty {
            fn extract(fields: &mut $crate::Fields<'r>) -> $crate::Result<Self> {
                $crate::convert::extract_deserialized(fields)
            }
        }
    };
    ($ty:ty) => {
        $crate::register_converter!(serialize $ty);
        $crate::register_converter!(deserialize $ty);
    };
}

// ============================================================================
// Built-in converters
// ============================================================================

/// Any serde type, stored as JSON text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Json<T>(pub T);

impl<T: serde::Serialize> Bind for Json<T> {
    fn bind<'a>(&'a self, out: &mut Binder<'a>) -> Result<()> {
        let text = serde_json::to_string(&self.0)?;
        out.copied(|out| out.text(&text))
    }
}

impl<'r, T: serde::de::DeserializeOwned> Extract<'r> for Json<T> {
    fn extract(fields: &mut Fields<'r>) -> Result<Self> {
        let text = fields.text()?;
        Ok(Json(serde_json::from_str(text)?))
    }
}

impl Bind for Uuid {
    fn bind<'a>(&'a self, out: &mut Binder<'a>) -> Result<()> {
        out.blob(self.as_bytes())
    }
}

impl<'r> Extract<'r> for Uuid {
    fn extract(fields: &mut Fields<'r>) -> Result<Self> {
        let bytes = fields.blob()?;
        Uuid::from_slice(bytes).map_err(|e| LiteError::Conversion(e.to_string()))
    }
}

impl Serialize for DateTime<Utc> {
    type Target = String;

    fn serialize(&self) -> String {
        self.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

impl Deserialize for DateTime<Utc> {
    type Source<'r> = &'r str;

    fn deserialize(text: &str) -> Result<Self> {
        DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| LiteError::Conversion(format!("invalid timestamp {text:?}: {e}")))
    }
}

crate::register_converter!(DateTime<Utc>);
