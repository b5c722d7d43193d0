//! Serde helpers for report output

/// Serialize a `Pubkey` as its base58 string
pub(crate) mod pubkey {
    use serde::Serializer;
    use solana_sdk::pubkey::Pubkey;

    pub fn serialize<S>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(key)
    }
}

/// Serialize an `Option<Pubkey>` as a base58 string or null
pub(crate) mod option_pubkey {
    use serde::Serializer;
    use solana_sdk::pubkey::Pubkey;

    pub fn serialize<S>(key: &Option<Pubkey>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match key {
            Some(key) => serializer.collect_str(key),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Serialize;
    use solana_sdk::pubkey::Pubkey;

    #[derive(Serialize)]
    struct Report {
        #[serde(with = "super::pubkey")]
        token: Pubkey,
        #[serde(with = "super::option_pubkey")]
        pool: Option<Pubkey>,
    }

    #[test]
    fn test_base58_output() {
        let token = Pubkey::new_unique();
        let json = serde_json::to_value(Report { token, pool: None }).unwrap();
        assert_eq!(json["token"], token.to_string());
        assert!(json["pool"].is_null());
    }
}
