use std::path::Path;

use {
    anyhow::{Context, Result},
    secrecy::SecretString,
};

use {
    booster_common::crypto::ChaChaCredentials,
    booster_config::{GatewayConfig, discover_and_load, load_config},
};

/// Load the config from `path`, or discover it when no path is given.
///
/// A file that cannot be loaded is an error whether it was given or
/// discovered. Defaults are used only when discovery finds no file.
pub fn load(path: Option<&Path>) -> Result<GatewayConfig> {
    match path {
        Some(path) => load_config(path),
        None => discover_and_load(),
    }
}

pub fn check(path: Option<&Path>) -> Result<()> {
    let config = load(path)?;
    config.validate().context("config is invalid")?;
    print!("{}", summary(&config));
    Ok(())
}

fn summary(config: &GatewayConfig) -> String {
    let mut out = format!(
        "listen: {}:{} ({})\n",
        config.address,
        config.port,
        if config.server_cert.is_ssl {
            "tls"
        } else {
            "plain"
        }
    );
    if config.registrar.endpoints.is_empty() {
        out.push_str("discovery: standalone\n");
    } else {
        out.push_str(&format!(
            "discovery: {}\n",
            config.registrar.endpoints.join(", ")
        ));
    }
    for (name, store) in config.engine_sections() {
        if store.enabled {
            out.push_str(&format!("{name}: enabled ({}/{})\n", store.host, store.database));
        } else {
            out.push_str(&format!("{name}: disabled\n"));
        }
    }
    out
}

pub fn encrypt_password(password: &str, path: Option<&Path>, key: Option<String>) -> Result<()> {
    let key = match key {
        Some(key) => key,
        None => load(path)?
            .credentials
            .key
            .filter(|k| !k.trim().is_empty())
            .context("no credential key: set credentials.key or BOOSTER_CREDENTIAL_KEY")?,
    };
    println!("{}", encrypt_with(&key, password)?);
    Ok(())
}

fn encrypt_with(key: &str, password: &str) -> Result<String> {
    let credentials = ChaChaCredentials::from_base64_key(&SecretString::new(key.to_string()))
        .context("invalid credential key")?;
    Ok(credentials.encrypt(password)?)
}

pub fn gen_key() -> String {
    ChaChaCredentials::generate_key()
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        booster_common::crypto::CredentialDecryptor,
        secrecy::ExposeSecret,
    };

    #[test]
    fn encrypted_password_decrypts_with_same_key() {
        let key = gen_key();
        let encrypted = encrypt_with(&key, "s3cret").unwrap();
        let credentials =
            ChaChaCredentials::from_base64_key(&SecretString::new(key)).unwrap();
        assert_eq!(credentials.decrypt(&encrypted).unwrap().expose_secret(), "s3cret");
    }

    #[test]
    fn bad_key_is_reported() {
        let err = encrypt_with("bm90IGEga2V5", "s3cret").unwrap_err();
        assert!(err.to_string().contains("invalid credential key"));
    }

    #[test]
    fn explicit_missing_path_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(dir.path().join("booster.toml").as_path())).is_err());
    }

    #[test]
    fn summary_lists_every_engine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("booster.toml");
        std::fs::write(
            &path,
            r#"
port = 8080

[apisjob]
enabled = true
host = "db.internal:3307"
database = "apis"
user = "booster"
"#,
        )
        .unwrap();
        let config = load(Some(path.as_path())).unwrap();
        config.validate().unwrap();

        let text = summary(&config);
        assert!(text.contains("listen: 127.0.0.1:8080 (plain)"));
        assert!(text.contains("discovery: standalone"));
        assert!(text.contains("apisjob: enabled (db.internal:3307/apis)"));
        assert!(text.contains("distcc: disabled"));
    }
}
