//! Binary NUMERIC wire format
//!
//! A NUMERIC is four big-endian i16 header fields (ndigits, weight, sign,
//! dscale) followed by `ndigits` base-10000 digits. `weight` is the power of
//! 10000 of the first digit.

use bytes::{BufMut, BytesMut};
use polysql_core::plain_decimal;

type BoxError = Box<dyn std::error::Error + Sync + Send>;

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Encodes decimal text such as `-12.50` into the NUMERIC binary format.
pub(crate) fn encode_numeric(text: &str, out: &mut BytesMut) -> Result<(), BoxError> {
    let trimmed = text.trim();
    let special = match trimmed.to_ascii_lowercase().as_str() {
        "nan" => Some(NUMERIC_NAN),
        "infinity" | "+infinity" | "inf" => Some(NUMERIC_PINF),
        "-infinity" | "-inf" => Some(NUMERIC_NINF),
        _ => None,
    };
    if let Some(sign) = special {
        put_header(out, 0, 0, sign, 0);
        return Ok(());
    }

    let plain =
        plain_decimal(trimmed).ok_or_else(|| format!("invalid numeric value {:?}", text))?;
    let (negative, unsigned) = match plain.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, plain.as_str()),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let dscale = i16::try_from(frac_part.len())
        .map_err(|_| format!("numeric scale too large in {:?}", text))?;

    let int_part = int_part.trim_start_matches('0');
    let int_pad = (4 - int_part.len() % 4) % 4;
    let int_digits = format!("{}{}", "0".repeat(int_pad), int_part);
    let frac_pad = (4 - frac_part.len() % 4) % 4;
    let frac_digits = format!("{}{}", frac_part, "0".repeat(frac_pad));

    let int_groups = int_digits.len() / 4;
    let mut digits: Vec<i16> = int_digits
        .as_bytes()
        .chunks(4)
        .chain(frac_digits.as_bytes().chunks(4))
        .map(group_value)
        .collect();

    let mut weight = int_groups as i32 - 1;
    let leading_zeros = digits.iter().take_while(|d| **d == 0).count();
    digits.drain(..leading_zeros);
    weight -= leading_zeros as i32;
    while digits.last() == Some(&0) {
        digits.pop();
    }

    if digits.is_empty() {
        put_header(out, 0, 0, NUMERIC_POS, dscale);
        return Ok(());
    }

    let ndigits =
        i16::try_from(digits.len()).map_err(|_| format!("numeric value too long: {:?}", text))?;
    let weight =
        i16::try_from(weight).map_err(|_| format!("numeric weight out of range: {:?}", text))?;
    put_header(
        out,
        ndigits,
        weight,
        if negative { NUMERIC_NEG } else { NUMERIC_POS },
        dscale,
    );
    for digit in digits {
        out.put_i16(digit);
    }
    Ok(())
}

fn group_value(chunk: &[u8]) -> i16 {
    chunk
        .iter()
        .fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0'))
}

fn put_header(out: &mut BytesMut, ndigits: i16, weight: i16, sign: u16, dscale: i16) {
    out.put_i16(ndigits);
    out.put_i16(weight);
    out.put_u16(sign);
    out.put_i16(dscale);
}

/// Decodes a binary NUMERIC into its text form, keeping `dscale` digits
/// after the point.
pub(crate) fn decode_numeric(raw: &[u8]) -> Result<String, BoxError> {
    if raw.len() < 8 {
        return Err("invalid NUMERIC payload: too short".into());
    }

    let ndigits = i16::from_be_bytes([raw[0], raw[1]]).max(0) as usize;
    let weight = i16::from_be_bytes([raw[2], raw[3]]) as i32;
    let sign = u16::from_be_bytes([raw[4], raw[5]]);
    let dscale = i16::from_be_bytes([raw[6], raw[7]]).max(0) as usize;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        NUMERIC_POS | NUMERIC_NEG => {}
        other => return Err(format!("invalid NUMERIC sign {:#06x}", other).into()),
    }

    if raw.len() < 8 + ndigits * 2 {
        return Err("invalid NUMERIC payload: truncated digits".into());
    }
    let mut digits = Vec::with_capacity(ndigits);
    for index in 0..ndigits {
        let offset = 8 + index * 2;
        let group = u16::from_be_bytes([raw[offset], raw[offset + 1]]);
        if group > 9999 {
            return Err("invalid NUMERIC payload: digit out of range".into());
        }
        digits.push(group);
    }

    // Digit i has weight `weight - i`.
    let digit_at = |w: i32| -> u16 {
        let index = weight - w;
        if index < 0 {
            return 0;
        }
        digits.get(index as usize).copied().unwrap_or(0)
    };

    let mut integer = String::new();
    if weight >= 0 {
        for w in (0..=weight).rev() {
            let group = digit_at(w);
            if integer.is_empty() {
                if group != 0 {
                    integer.push_str(&group.to_string());
                }
            } else {
                integer.push_str(&format!("{:04}", group));
            }
        }
    }
    if integer.is_empty() {
        integer.push('0');
    }

    let mut fraction = String::new();
    let mut w = -1;
    while fraction.len() < dscale {
        fraction.push_str(&format!("{:04}", digit_at(w)));
        w -= 1;
    }
    fraction.truncate(dscale);

    let is_zero = digits.iter().all(|d| *d == 0);
    let mut text = String::new();
    if sign == NUMERIC_NEG && !is_zero {
        text.push('-');
    }
    text.push_str(&integer);
    if !fraction.is_empty() {
        text.push('.');
        text.push_str(&fraction);
    }
    Ok(text)
}
