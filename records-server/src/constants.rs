pub(crate) const ACCOUNT_TAG: &str = "Accounts";
pub(crate) const APPOINTMENT_TAG: &str = "Appointments";

/// Response header carrying the issued credential on register/login.
/// Must stay in the CORS expose list or browsers cannot read it.
pub(crate) const TOKEN_HEADER: &str = "x-auth-token";
