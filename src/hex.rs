use std::fmt::Display;

/// Lowercase hexadecimal encoding of binary data.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Hex(pub String);

/// Reasons a string fails to decode as hexadecimal.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum HexError {
    OddLength(usize),
    BadDigit(u8),
}

impl Display for Hex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'a> From<&'a [u8]> for Hex {
    fn from(bytes: &[u8]) -> Self {
        fn hex_digit(b: u8) -> char {
            match b {
                0..=9 => (b + b'0') as char,
                10..=15 => (b + b'a' - 10) as char,
                _ => unreachable!("nibble out of range"),
            }
        }

        let mut out = String::with_capacity(bytes.len() * 2);
        for &b in bytes {
            out.push(hex_digit(b >> 4));
            out.push(hex_digit(b & 0b00001111));
        }
        Hex(out)
    }
}

impl TryFrom<&Hex> for Vec<u8> {
    type Error = HexError;

    fn try_from(value: &Hex) -> Result<Self, Self::Error> {
        fn unhex_digit(h: u8) -> Result<u8, HexError> {
            match h {
                b'0'..=b'9' => Ok(h - b'0'),
                b'a'..=b'f' => Ok(h - b'a' + 10),
                b'A'..=b'F' => Ok(h - b'A' + 10),
                _ => Err(HexError::BadDigit(h)),
            }
        }

        let digits = value.0.as_bytes();
        if digits.len() % 2 != 0 {
            return Err(HexError::OddLength(digits.len()));
        }

        digits
            .chunks(2)
            .map(|pair| Ok(unhex_digit(pair[0])? << 4 | unhex_digit(pair[1])?))
            .collect()
    }
}

#[test]
fn test_hex_round_trip() {
    let example: &[u8] = b"hello, world";
    let hex: Hex = Hex::from(example);
    assert_eq!(hex.to_string(), "68656c6c6f2c20776f726c64");
    let bytes: Vec<u8> = Vec::try_from(&hex).unwrap();
    assert_eq!(example, bytes.as_slice());
}

#[test]
fn test_hex_rejects_garbage() {
    assert_eq!(
        Vec::try_from(&Hex(String::from("abc"))),
        Err(HexError::OddLength(3))
    );
    assert_eq!(
        Vec::try_from(&Hex(String::from("zz"))),
        Err(HexError::BadDigit(b'z'))
    );
}
