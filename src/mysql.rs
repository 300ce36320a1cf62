//! MySQL transport glue: DSN construction and the runtime SQL error
//! classification table described in §7.
//!
//! Grounded in `examples/MrCroxx-yay`'s choice of `anyhow`/`thiserror` for
//! error plumbing, generalized here to wrap `mysql_async`, the async
//! MySQL driver `examples/surrealdb-crud-bench` and
//! `examples/qingfengzxr-db-performance-observer` both use for the same
//! purpose (dialing a real MySQL server from a benchmark driver).

use std::collections::HashMap;

use bitflags::bitflags;

bitflags! {
    /// How a classified MySQL server error should be handled by the
    /// client loop. Unknown codes default to `EABORT` (§7).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MySQLErrorHandling: u8 {
        /// Surface the error; the stage fails.
        const EABORT     = 0b0000_0001;
        /// Issue `ROLLBACK` if inside a transaction.
        const EROLLBACK  = 0b0000_0010;
        /// Discard and proceed to the next iteration boundary.
        const ECONTINUE  = 0b0000_0100;
        /// Drop the connection and reopen on the next iteration.
        const ERECONNECT = 0b0000_1000;
        /// Suppress reporting (combinable with the others).
        const ESILENT    = 0b0001_0000;
    }
}

/// Process-wide, read-only-after-init table mapping a MySQL server error
/// code to its handling policy. Cheap to clone (a plain `HashMap` of
/// small values) so each stage can hand every client task its own owned
/// copy rather than threading a lifetime through `tokio::spawn`.
#[derive(Clone)]
pub struct ErrorPolicy {
    codes: HashMap<u16, MySQLErrorHandling>,
}

impl ErrorPolicy {
    /// A reasonable built-in default: transient/lock errors roll back and
    /// continue, connection-loss errors trigger a reconnect, everything
    /// else aborts.
    pub fn with_defaults() -> Self {
        let mut codes = HashMap::new();
        // ER_LOCK_DEADLOCK, ER_LOCK_WAIT_TIMEOUT: transient contention.
        codes.insert(1213, MySQLErrorHandling::EROLLBACK | MySQLErrorHandling::ECONTINUE);
        codes.insert(1205, MySQLErrorHandling::EROLLBACK | MySQLErrorHandling::ECONTINUE);
        // ER_DUP_ENTRY: expected under concurrent inserts into the same
        // keyspace; don't kill the stage over it.
        codes.insert(1062, MySQLErrorHandling::ECONTINUE | MySQLErrorHandling::ESILENT);
        // ER_LOCK_TABLE_FULL, connection-loss family.
        codes.insert(1206, MySQLErrorHandling::ERECONNECT);
        codes.insert(2013, MySQLErrorHandling::ERECONNECT); // CR_SERVER_LOST
        codes.insert(2006, MySQLErrorHandling::ERECONNECT); // CR_SERVER_GONE_ERROR
        Self { codes }
    }

    pub fn register(&mut self, code: u16, handling: MySQLErrorHandling) {
        self.codes.insert(code, handling);
    }

    pub fn classify(&self, err: &mysql_async::Error) -> MySQLErrorHandling {
        match err {
            mysql_async::Error::Server(server_err) => self
                .codes
                .get(&server_err.code)
                .copied()
                .unwrap_or(MySQLErrorHandling::EABORT),
            mysql_async::Error::Io(_) => MySQLErrorHandling::ERECONNECT,
            _ => MySQLErrorHandling::EABORT,
        }
    }
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_code_defaults_to_abort() {
        let policy = ErrorPolicy::with_defaults();
        assert_eq!(policy.codes.get(&9999), None);
    }

    #[test]
    fn deadlock_rolls_back_and_continues() {
        let policy = ErrorPolicy::with_defaults();
        let handling = policy.codes[&1213];
        assert!(handling.contains(MySQLErrorHandling::EROLLBACK));
        assert!(handling.contains(MySQLErrorHandling::ECONTINUE));
    }

    #[test]
    fn custom_registration_overrides_default() {
        let mut policy = ErrorPolicy::with_defaults();
        policy.register(1062, MySQLErrorHandling::EABORT);
        assert_eq!(policy.codes[&1062], MySQLErrorHandling::EABORT);
    }
}
