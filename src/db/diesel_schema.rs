// Mirrors the DDL in schema.rs.

diesel::table! {
    addresses (address) {
        address -> Text,
        balance -> BigInt,
    }
}

diesel::table! {
    tokens (id) {
        id -> BigInt,
        token -> Text,
        address -> Text,
        ip_address -> Text,
        location_json -> Nullable<Text>,
        farmer_id -> Text,
        heartbeat_count -> BigInt,
        message -> Nullable<Text>,
        signature -> Nullable<Text>,
        cache_start -> Nullable<BigInt>,
        cache_end -> Nullable<BigInt>,
        cache_uptime_ms -> BigInt,
        created_at -> BigInt,
    }
}

diesel::table! {
    files (hash) {
        hash -> Text,
        size -> BigInt,
        seed -> Text,
        redundancy -> Integer,
        interval_secs -> BigInt,
        added_at -> BigInt,
    }
}

diesel::table! {
    chunks (id) {
        id -> BigInt,
        file_hash -> Text,
        state -> Binary,
        tag_hash -> Text,
        created_at -> BigInt,
    }
}

diesel::table! {
    contracts (id) {
        id -> BigInt,
        token_id -> BigInt,
        file_hash -> Text,
        state -> Binary,
        challenge -> Nullable<Binary>,
        tag_hash -> Text,
        start -> BigInt,
        due -> BigInt,
        answered -> Bool,
        cached -> Bool,
    }
}

diesel::joinable!(tokens -> addresses (address));
diesel::joinable!(chunks -> files (file_hash));
diesel::joinable!(contracts -> files (file_hash));
diesel::joinable!(contracts -> tokens (token_id));

diesel::allow_tables_to_appear_in_same_query!(addresses, tokens, files, chunks, contracts,);
