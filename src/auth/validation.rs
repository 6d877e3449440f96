//! Input validation for account data.
//!
//! National ID numbers follow the Taiwanese format: one uppercase letter,
//! a gender digit (1 or 2), seven serial digits and a check digit.

use chrono::NaiveDate;

use crate::models::{RegisterRequest, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IdNumberError {
    #[error("請輸入身分證字號")]
    Empty,
    #[error("身分證字號長度必須為 10 個字元")]
    Length,
    #[error("身分證字號第一個字元必須為大寫字母")]
    FirstLetter,
    #[error("身分證字號第二個字元必須為 1 或 2")]
    Gender,
    #[error("身分證字號後 8 個字元必須為數字")]
    Digits,
    #[error("身分證字號檢查碼錯誤")]
    Checksum,
}

/// Letter → two-digit area code. Note the out-of-order codes for I, O, W-Z.
fn letter_code(c: char) -> Option<u32> {
    let code = match c {
        'A' => 10, 'B' => 11, 'C' => 12, 'D' => 13, 'E' => 14, 'F' => 15,
        'G' => 16, 'H' => 17, 'I' => 34, 'J' => 18, 'K' => 19, 'L' => 20,
        'M' => 21, 'N' => 22, 'O' => 35, 'P' => 23, 'Q' => 24, 'R' => 25,
        'S' => 26, 'T' => 27, 'U' => 28, 'V' => 29, 'W' => 32, 'X' => 30,
        'Y' => 31, 'Z' => 33,
        _ => return None,
    };
    Some(code)
}

pub fn validate_id_number(id_number: &str) -> Result<(), IdNumberError> {
    if id_number.is_empty() {
        return Err(IdNumberError::Empty);
    }
    let chars: Vec<char> = id_number.chars().collect();
    if chars.len() != 10 {
        return Err(IdNumberError::Length);
    }
    if !chars[0].is_ascii_uppercase() {
        return Err(IdNumberError::FirstLetter);
    }
    if chars[1] != '1' && chars[1] != '2' {
        return Err(IdNumberError::Gender);
    }
    if !chars[2..].iter().all(|c| c.is_ascii_digit()) {
        return Err(IdNumberError::Digits);
    }

    let area = letter_code(chars[0]).ok_or(IdNumberError::FirstLetter)?;
    let digits: Vec<u32> = chars[1..].iter().filter_map(|c| c.to_digit(10)).collect();

    if check_digit(area, &digits[..8]) != digits[8] {
        return Err(IdNumberError::Checksum);
    }
    Ok(())
}

/// Check digit over the area code and the gender + serial digits.
fn check_digit(area: u32, digits: &[u32]) -> u32 {
    let mut total = area / 10 + (area % 10) * 9;
    for (digit, weight) in digits.iter().zip((1..=8).rev()) {
        total += digit * weight;
    }
    (10 - total % 10) % 10
}

/// A well-formed ID number with a random serial, so tests against a shared
/// database do not collide.
#[cfg(test)]
pub(crate) fn random_id_number() -> String {
    use rand::Rng;

    let serial = rand::rng().random_range(0..10_000_000u32);
    let body = format!("1{serial:07}");
    let digits: Vec<u32> = body.chars().filter_map(|c| c.to_digit(10)).collect();
    // 'Z' is an area no fixture uses
    let check = check_digit(33, &digits);
    format!("Z{body}{check}")
}

pub fn validate_phone_number(phone_number: &str) -> bool {
    phone_number.len() == 10 && phone_number.chars().all(|c| c.is_ascii_digit())
}

pub fn validate_email(email: &str) -> bool {
    email.contains('@') && email.contains('.') && email.chars().count() <= 100
}

pub fn validate_password(password: &str) -> bool {
    password.chars().count() >= 8
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// Fields of a registration request that survived validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRegistration {
    pub birth_date: NaiveDate,
    pub role: Role,
}

/// Validates everything that can be checked without the database.
pub fn validate_registration(request: &RegisterRequest) -> Result<ValidRegistration, String> {
    validate_id_number(&request.id_number)
        .map_err(|e| format!("身分證字號格式不正確: {}", e))?;

    if !validate_phone_number(&request.phone_number) {
        return Err("手機號碼格式不正確，必須為 10 位數字".to_string());
    }
    if !validate_email(&request.email) {
        return Err("電子郵件格式不正確".to_string());
    }
    if !validate_password(&request.password) {
        return Err("密碼長度必須至少 8 個字元".to_string());
    }
    let birth_date = parse_date(&request.birth_date)
        .ok_or_else(|| "出生日期格式不正確，必須為 YYYY-MM-DD".to_string())?;
    let role = Role::parse(&request.role).ok_or_else(invalid_role_message)?;

    Ok(ValidRegistration { birth_date, role })
}

pub fn invalid_role_message() -> String {
    let names: Vec<&str> = Role::ALL.iter().map(|r| r.as_str()).collect();
    format!("無效的角色，必須為 {} 之一", names.join(", "))
}
