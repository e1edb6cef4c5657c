//! Integration tests for mailvault-remote
//!
//! Uses wiremock to simulate the Gmail API, Microsoft Graph and an OAuth2
//! token endpoint, and verifies listing, downloading, error classification
//! and token refresh end to end.


mod test_office365;
