//! The 8-byte NaN-boxed slot the guest uses to refer to host values.
//!
//! Numbers other than zero and NaN travel inline as raw f64 bits. Every other
//! value is a quiet NaN whose high word carries a type flag and whose low word
//! is a value-table id. All-zero bits mean `undefined`.
//!
//! The host never holds symbols, so it never writes [`TypeFlag::Symbol`].
//! The flag is still decoded: lookups go by id alone and ignore it.

/// High word shared by every boxed reference.
pub const NAN_HEAD: u32 = 0x7FF8_0000;

/// Type tag stored in the low bits of the high word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TypeFlag {
    /// null, booleans, zero and NaN.
    None = 0,
    Object = 1,
    String = 2,
    /// Decode-only.
    Symbol = 3,
    Function = 4,
}

impl TypeFlag {
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::Object),
            2 => Some(Self::String),
            3 => Some(Self::Symbol),
            4 => Some(Self::Function),
            _ => None,
        }
    }
}

/// A decoded slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slot {
    Undefined,
    /// An inline number (never zero, never NaN).
    Number(f64),
    Ref { id: u32, flag: TypeFlag },
}

impl Slot {
    /// Decodes raw slot bits.
    ///
    /// Returns `Slot::Undefined` for a numeric zero (which is how the guest
    /// encodes `undefined`). Flag bits outside the known set decode as
    /// `TypeFlag::None`; the id is what matters for lookups.
    pub fn from_bits(bits: u64) -> Self {
        let f = f64::from_bits(bits);
        if f == 0.0 {
            return Slot::Undefined;
        }
        if !f.is_nan() {
            return Slot::Number(f);
        }
        let high = (bits >> 32) as u32;
        let flag = TypeFlag::from_u32(high.wrapping_sub(NAN_HEAD)).unwrap_or(TypeFlag::None);
        Slot::Ref {
            id: bits as u32,
            flag,
        }
    }

    pub fn to_bits(self) -> u64 {
        match self {
            Slot::Undefined => 0,
            Slot::Number(n) => n.to_bits(),
            Slot::Ref { id, flag } => (((NAN_HEAD | flag as u32) as u64) << 32) | id as u64,
        }
    }

    /// The reference for a NaN number: id 0 with no flag.
    pub const NAN: Slot = Slot::Ref {
        id: 0,
        flag: TypeFlag::None,
    };
}
