use rusqlite::Connection;

/// Initialize the main database schema (everything except the scan log)
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    // WAL: readers never block the single writer, which matters for check-in
    // lookups during a sales rush
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;

        -- Events (supporting record; the catalogue itself lives elsewhere)
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            starts_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- Ticket tiers with their inventory ledger.
        -- The counters are only written by conditional single-row UPDATEs.
        CREATE TABLE IF NOT EXISTS ticket_tiers (
            id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            capacity INTEGER NOT NULL,
            available INTEGER NOT NULL,
            reserved INTEGER NOT NULL DEFAULT 0,
            sold INTEGER NOT NULL DEFAULT 0,
            price_cents INTEGER NOT NULL CHECK (price_cents >= 0),
            currency TEXT NOT NULL,
            fee_flat_cents INTEGER CHECK (fee_flat_cents IS NULL OR fee_flat_cents >= 0),
            fee_percentage_bps INTEGER CHECK (fee_percentage_bps IS NULL OR fee_percentage_bps >= 0),
            display_order INTEGER NOT NULL DEFAULT 0,
            hide_until_previous_sold_out INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            CHECK (available >= 0 AND reserved >= 0 AND sold >= 0),
            CHECK (available + reserved + sold = capacity)
        );
        CREATE INDEX IF NOT EXISTS idx_ticket_tiers_event ON ticket_tiers(event_id, display_order);

        -- Products (merch and add-ons; priced, never held)
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            price_cents INTEGER NOT NULL CHECK (price_cents >= 0),
            currency TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_products_event ON products(event_id);

        -- Fee rules. event_id NULL = site-wide default.
        CREATE TABLE IF NOT EXISTS fee_rules (
            id TEXT PRIMARY KEY,
            event_id TEXT REFERENCES events(id) ON DELETE CASCADE,
            flat_cents INTEGER NOT NULL DEFAULT 0 CHECK (flat_cents >= 0),
            percentage_bps INTEGER NOT NULL DEFAULT 0 CHECK (percentage_bps >= 0),
            position INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_fee_rules_event ON fee_rules(event_id, position);

        -- Holds. Row present = active. Rows are claimed with DELETE ... RETURNING,
        -- never updated.
        CREATE TABLE IF NOT EXISTS holds (
            id TEXT PRIMARY KEY,
            tier_id TEXT NOT NULL REFERENCES ticket_tiers(id) ON DELETE CASCADE,
            quantity INTEGER NOT NULL CHECK (quantity > 0),
            owner_id TEXT NOT NULL,
            fingerprint TEXT,
            expires_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_holds_expires ON holds(expires_at);
        CREATE INDEX IF NOT EXISTS idx_holds_tier ON holds(tier_id);

        -- Orders
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            buyer_id TEXT NOT NULL,
            buyer_email TEXT,
            event_id TEXT NOT NULL REFERENCES events(id),
            currency TEXT NOT NULL,
            subtotal_cents INTEGER NOT NULL,
            fees_cents INTEGER NOT NULL,
            total_cents INTEGER NOT NULL,
            payment_session_id TEXT,
            payment_intent_id TEXT,
            session_expires_at INTEGER,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'completed', 'failed', 'refunded', 'expired')),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_orders_buyer ON orders(buyer_id, created_at DESC);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_orders_session ON orders(payment_session_id)
            WHERE payment_session_id IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_orders_intent ON orders(payment_intent_id)
            WHERE payment_intent_id IS NOT NULL;

        -- Order items. hold_id has no foreign key: the hold row is deleted once
        -- it is promoted or released, the reference stays.
        CREATE TABLE IF NOT EXISTS order_items (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            kind TEXT NOT NULL CHECK (kind IN ('ticket', 'product')),
            tier_id TEXT REFERENCES ticket_tiers(id),
            product_id TEXT REFERENCES products(id),
            hold_id TEXT,
            quantity INTEGER NOT NULL CHECK (quantity > 0),
            unit_price_cents INTEGER NOT NULL,
            unit_fee_cents INTEGER NOT NULL DEFAULT 0,
            fees_cents INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            CHECK (
                (kind = 'ticket' AND tier_id IS NOT NULL AND product_id IS NULL)
                OR (kind = 'product' AND product_id IS NOT NULL AND tier_id IS NULL)
            )
        );
        CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id);

        -- Tickets. Never deleted; refunds and cancellations are statuses.
        CREATE TABLE IF NOT EXISTS tickets (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES orders(id),
            order_item_id TEXT NOT NULL REFERENCES order_items(id),
            tier_id TEXT NOT NULL REFERENCES ticket_tiers(id),
            event_id TEXT NOT NULL REFERENCES events(id),
            attendee_name TEXT,
            attendee_email TEXT,
            scan_token TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'valid'
                CHECK (status IN ('valid', 'used', 'refunded', 'cancelled')),
            checked_in_at INTEGER,
            checked_in_by TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tickets_order ON tickets(order_id);
        CREATE INDEX IF NOT EXISTS idx_tickets_event ON tickets(event_id);

        -- Webhook events (exactly-once processing of provider notifications)
        CREATE TABLE IF NOT EXISTS webhook_events (
            provider TEXT NOT NULL,
            event_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (provider, event_id)
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_events_created ON webhook_events(created_at);

        -- API keys (SHA-256 hashed, role decides what the key may do)
        CREATE TABLE IF NOT EXISTS api_keys (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            key_prefix TEXT NOT NULL,
            key_hash TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL CHECK (role IN ('customer', 'scanner', 'admin')),
            created_at INTEGER NOT NULL,
            revoked_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_api_keys_user ON api_keys(user_id);
        "#,
    )?;
    Ok(())
}

/// Initialize the audit database schema (separate DB file)
/// Append-only workload, so WAL with relaxed sync
pub fn init_audit_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 1000;
        PRAGMA journal_size_limit = 67108864;

        CREATE TABLE IF NOT EXISTS scan_logs (
            id TEXT PRIMARY KEY,
            timestamp INTEGER NOT NULL,
            ticket_id TEXT,                       -- null when the payload never resolved to a ticket
            event_id TEXT NOT NULL,
            operator_id TEXT NOT NULL,
            result TEXT NOT NULL,                 -- 'ok' or the rejection reason
            device_id TEXT,
            location TEXT,
            ip_address TEXT,
            user_agent TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_scan_logs_timestamp ON scan_logs(timestamp);
        CREATE INDEX IF NOT EXISTS idx_scan_logs_ticket ON scan_logs(ticket_id);
        CREATE INDEX IF NOT EXISTS idx_scan_logs_event_time ON scan_logs(event_id, timestamp DESC);
        "#,
    )?;
    Ok(())
}
