use uuid::Uuid;

pub const EXTRACT_URL_PATH: &str = "userdata";
/// Wildcard-certificate domain that fronts secure-copy extraction hosts.
pub const SECURE_COPY_DOMAIN: &str = "realhostip.com";

/// Public extraction URL for a token served by `host_address`. With secure
/// copy the address is folded into a hostname under the fixed domain so one
/// wildcard certificate covers every host.
pub fn generate_copy_url(secure: bool, host_address: &str, token: &str) -> String {
    if secure {
        let host = host_address.replace('.', "-");
        format!("https://{host}.{SECURE_COPY_DOMAIN}/{EXTRACT_URL_PATH}/{token}")
    } else {
        format!("http://{host_address}/{EXTRACT_URL_PATH}/{token}")
    }
}

/// Fresh opaque token carrying a subject file extension.
pub fn template_token(extension: &str) -> String {
    format!("{}.{extension}", Uuid::new_v4())
}

/// Volume tokens inherit the extension of the copy they expose; a path
/// without one yields a bare token.
pub fn volume_token(install_path: &str) -> String {
    match install_path.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && !ext.contains('/') => {
            format!("{}.{ext}", Uuid::new_v4())
        }
        _ => Uuid::new_v4().to_string(),
    }
}
