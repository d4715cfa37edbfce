//! 値オブジェクト
//!
//! ゲートウェイが受け取った文字列を検証済みのドメイン型に変換します。
//! ルーム ID の検証は `RoomManager::create_error` の責務です。

use super::ValueObjectError;

/// ユーザー名の最大文字数
pub const USERNAME_MAX_CHARS: usize = 10;

/// 表示名
///
/// 英数字、`_`、`-`、CJK 統合漢字（U+3400..=U+9FFF）、
/// CJK 互換漢字（U+F900..=U+FAFF）のみ、1〜10 文字。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Username(String);

impl Username {
    pub fn new(value: String) -> Result<Self, ValueObjectError> {
        let count = value.chars().count();
        if count == 0 || count > USERNAME_MAX_CHARS {
            return Err(ValueObjectError::UsernameLength {
                max: USERNAME_MAX_CHARS,
                actual: count,
            });
        }
        if let Some(c) = value.chars().find(|c| !is_username_char(*c)) {
            return Err(ValueObjectError::UsernameInvalidChar(c));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Username {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

fn is_username_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c == '_'
        || c == '-'
        || ('\u{3400}'..='\u{9FFF}').contains(&c)
        || ('\u{F900}'..='\u{FAFF}').contains(&c)
}
