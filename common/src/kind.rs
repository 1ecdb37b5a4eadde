//! Macros for defining kind enums.

use std::fmt;

/// Macro for defining a kind enum.
///
/// # Example
///
/// ```rust
/// # use common::define_kind;
/// #
/// define_kind! {
///     #[doc = "Status of a unit."]
///     enum Status {
///         #[doc = "Unit is free."]
///         Free = 1,
///
///         #[doc = "Unit is booked."]
///         Booked = 2,
///     }
/// }
///
/// assert_eq!(Status::try_from(2_u8), Ok(Status::Booked));
/// assert_eq!(Status::VARIANTS.len(), 2);
/// assert_eq!("FREE".parse::<Status>(), Ok(Status::Free));
/// ```
#[expect(clippy::module_name_repetitions, reason = "more readable")]
#[macro_export]
macro_rules! define_kind {
    (
        #[doc = $doc:literal]
        enum $name:ident {
            $(
                #[doc = $variant_doc:literal]
                $variant:ident = $value:expr
            ),* $(,)?
        }
    ) => {
        $crate::kind_serde! {
            #[derive(
                Clone,
                Copy,
                Debug,
                $crate::private::strum::Display,
                $crate::private::strum::EnumString,
                Eq,
                Hash,
                PartialEq,
            )]
            #[doc = $doc]
            #[repr(u8)]
            #[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
            pub enum $name {
                $(
                     #[doc = $variant_doc]
                     $variant = $value,
                )*
            }
        }

        impl $name {
            /// All the variants of this kind, in declaration order.
            pub const VARIANTS: &'static [Self] = &[$(Self::$variant),*];

            /// Converts this into its [`u8`] representation.
            #[must_use]
            pub const fn u8(self) -> u8 {
                self as u8
            }
        }

        impl ::core::convert::TryFrom<u8> for $name {
            type Error = $crate::UnknownKind;

            fn try_from(v: u8) -> Result<Self, Self::Error> {
                Self::VARIANTS
                    .iter()
                    .copied()
                    .find(|k| k.u8() == v)
                    .ok_or($crate::UnknownKind {
                        kind: ::core::stringify!($name),
                        value: v,
                    })
            }
        }

        #[cfg(feature = "postgres")]
        impl<'a> $crate::private::postgres_types::FromSql<'a> for $name {
            $crate::private::postgres_types::accepts!(INT2);

            fn from_sql(
                ty: &$crate::private::postgres_types::Type,
                raw: &[u8],
            ) -> Result<
                $name,
                Box<dyn ::std::error::Error
                    + ::core::marker::Sync
                    + ::core::marker::Send>,
            > {
                Ok(Self::try_from(u8::try_from(i16::from_sql(ty, raw)?)?)?)
            }
        }

        #[cfg(feature = "postgres")]
        impl $crate::private::postgres_types::ToSql for $name {
            $crate::private::postgres_types::accepts!(INT2);
            $crate::private::postgres_types::to_sql_checked!();

            fn to_sql(
                &self,
                ty: &$crate::private::postgres_types::Type,
                w: &mut $crate::private::postgres_types::private::BytesMut,
            ) -> Result<
                $crate::private::postgres_types::IsNull,
                ::std::boxed::Box<
                    dyn ::std::error::Error
                        + ::core::marker::Sync
                        + ::core::marker::Send
                >,
            > {
                i16::from(self.u8()).to_sql(ty, w)
            }
        }
    };
}

/// Derives `serde` traits in SCREAMING_SNAKE_CASE on the provided kind
/// enum, if the `serde` feature of this crate is enabled.
#[cfg(feature = "serde")]
#[doc(hidden)]
#[macro_export]
macro_rules! kind_serde {
    ($item:item) => {
        #[derive(
            $crate::private::serde::Deserialize,
            $crate::private::serde::Serialize,
        )]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        $item
    };
}

/// Passes the provided kind enum through, as the `serde` feature of this
/// crate is disabled.
#[cfg(not(feature = "serde"))]
#[doc(hidden)]
#[macro_export]
macro_rules! kind_serde {
    ($item:item) => {
        $item
    };
}

/// Error of converting an unknown [`u8`] into a kind enum.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UnknownKind {
    /// Name of the kind enum.
    pub kind: &'static str,

    /// Unknown value.
    pub value: u8,
}

impl fmt::Display for UnknownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid `{}` value: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownKind {}
