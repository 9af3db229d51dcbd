use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{SigningKey, VerifyingKey};

/// Generate an Ed25519 witness keypair and write it to files.
///
/// Writes `<prefix>.secret` (base64-encoded 32-byte seed) and
/// `<prefix>.pub` (base64-encoded 32-byte verifying key). Witnesses sign
/// attestation messages with the secret; coordinators verify with the
/// public key. Sets .secret file permissions to 0o600 on Unix.
pub fn cmd_keygen(algorithm: &str, output_prefix: &str) {
    if algorithm != "ed25519" {
        eprintln!(
            "error: unsupported algorithm '{}'; only 'ed25519' is supported",
            algorithm
        );
        std::process::exit(1);
    }

    let mut rng = rand::rngs::OsRng;
    let signing_key = SigningKey::generate(&mut rng);
    let verifying_key = signing_key.verifying_key();

    let secret_b64 = BASE64.encode(signing_key.to_bytes());
    let pub_b64 = BASE64.encode(verifying_key.to_bytes());

    let secret_path = format!("{}.secret", output_prefix);
    if let Err(e) = std::fs::write(&secret_path, &secret_b64) {
        eprintln!("error writing secret key to '{}': {}", secret_path, e);
        std::process::exit(1);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        if let Err(e) = std::fs::set_permissions(&secret_path, perms) {
            tracing::warn!("failed to set permissions on '{}': {}", secret_path, e);
        }
    }

    let pub_path = format!("{}.pub", output_prefix);
    if let Err(e) = std::fs::write(&pub_path, &pub_b64) {
        eprintln!("error writing public key to '{}': {}", pub_path, e);
        std::process::exit(1);
    }

    println!(
        "Generated Ed25519 witness keypair: {}.secret, {}.pub (fingerprint {})",
        output_prefix,
        output_prefix,
        key_fingerprint(&verifying_key)
    );
}

/// Short hex fingerprint of a verifying key (its first 8 bytes).
pub fn key_fingerprint(key: &VerifyingKey) -> String {
    key.to_bytes()[..8]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
