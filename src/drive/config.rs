use once_cell::sync::Lazy;
use std::env;

pub static GOOGLE_CLIENT_ID: Lazy<String> =
    Lazy::new(|| env::var("GOOGLE_CLIENT_ID").unwrap_or_default());

pub static GOOGLE_CLIENT_SECRET: Lazy<String> =
    Lazy::new(|| env::var("GOOGLE_CLIENT_SECRET").unwrap_or_default());

pub static GOOGLE_REFRESH_TOKEN: Lazy<String> =
    Lazy::new(|| env::var("GOOGLE_REFRESH_TOKEN").unwrap_or_default());

pub static OAUTH_TOKEN_URL: Lazy<String> = Lazy::new(|| {
    env::var("GOOGLE_OAUTH_TOKEN_URL")
        .unwrap_or_else(|_| "https://oauth2.googleapis.com/token".to_string())
});

pub static API_ROOT: Lazy<String> = Lazy::new(|| {
    env::var("GOOGLE_DRIVE_API_ROOT")
        .unwrap_or_else(|_| "https://www.googleapis.com".to_string())
        .trim_end_matches('/')
        .to_string()
});

pub static FILES_URL: Lazy<String> = Lazy::new(|| format!("{}/drive/v3/files", *API_ROOT));

pub static UPLOAD_URL: Lazy<String> =
    Lazy::new(|| format!("{}/upload/drive/v3/files", *API_ROOT));
