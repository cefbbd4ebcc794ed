pub const NORMAL_CLOSE_CODE: u16 = 1000;
/// Sent by the service after it already reported an `error` message.
pub const APP_ERROR_CLOSE_CODE: u16 = 4332;
/// Used by the client when the user stops a generation.
pub const USER_CLOSE_CODE: u16 = 4333;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    Normal,
    UserCancelled,
    ApplicationError,
    /// Any other code, or a close without one.
    Unexpected(Option<u16>),
}

impl CloseKind {
    pub fn from_code(code: Option<u16>) -> Self {
        match code {
            Some(NORMAL_CLOSE_CODE) => Self::Normal,
            Some(USER_CLOSE_CODE) => Self::UserCancelled,
            Some(APP_ERROR_CLOSE_CODE) => Self::ApplicationError,
            other => Self::Unexpected(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CloseKind;

    #[test]
    fn close_codes_map_to_kinds() {
        assert_eq!(CloseKind::from_code(Some(1000)), CloseKind::Normal);
        assert_eq!(CloseKind::from_code(Some(4333)), CloseKind::UserCancelled);
        assert_eq!(CloseKind::from_code(Some(4332)), CloseKind::ApplicationError);
        assert_eq!(
            CloseKind::from_code(Some(1006)),
            CloseKind::Unexpected(Some(1006))
        );
        assert_eq!(CloseKind::from_code(None), CloseKind::Unexpected(None));
    }
}
