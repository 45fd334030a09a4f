use std::collections::HashMap;

pub(crate) const SERVICE_NAME: &str = "second-brain";

/// Store the session refresh token in the system keyring via Secret Service.
pub async fn store_refresh_token(backend_url: &str, refresh_token: &str) -> Result<(), String> {
    let keyring = oo7::Keyring::new()
        .await
        .map_err(|e| format!("Failed to connect to keyring: {}", e))?;

    let mut attrs = HashMap::new();
    attrs.insert("service", SERVICE_NAME);
    attrs.insert("backend", backend_url);

    keyring
        .create_item(
            &format!("Second Brain session ({})", backend_url),
            &attrs,
            refresh_token.as_bytes(),
            true, // replace existing
        )
        .await
        .map_err(|e| format!("Failed to store session: {}", e))?;

    Ok(())
}

/// Load the stored refresh token for a backend, if any.
pub async fn load_refresh_token(backend_url: &str) -> Result<Option<String>, String> {
    let keyring = oo7::Keyring::new()
        .await
        .map_err(|e| format!("Failed to connect to keyring: {}", e))?;

    let mut attrs = HashMap::new();
    attrs.insert("service", SERVICE_NAME);
    attrs.insert("backend", backend_url);

    let items = keyring
        .search_items(&attrs)
        .await
        .map_err(|e| format!("Failed to search keyring: {}", e))?;

    let Some(item) = items.first() else {
        return Ok(None);
    };
    let secret = item
        .secret()
        .await
        .map_err(|e| format!("Failed to read secret: {}", e))?;
    let token = String::from_utf8(secret.to_vec())
        .map_err(|e| format!("Invalid UTF-8 in secret: {}", e))?;
    Ok(Some(token))
}

/// Forget the stored session for a backend.
pub async fn delete_refresh_token(backend_url: &str) -> Result<(), String> {
    let keyring = oo7::Keyring::new()
        .await
        .map_err(|e| format!("Failed to connect to keyring: {}", e))?;

    let mut attrs = HashMap::new();
    attrs.insert("service", SERVICE_NAME);
    attrs.insert("backend", backend_url);

    let items = keyring
        .search_items(&attrs)
        .await
        .map_err(|e| format!("Failed to search keyring: {}", e))?;

    for item in items {
        item.delete()
            .await
            .map_err(|e| format!("Failed to delete session: {}", e))?;
    }

    Ok(())
}
