//! Single table of wire-format delimiters, message-kind tags, and queue/exchange
//! name prefixes. Kept here instead of scattered per-module literals so the
//! whole wire vocabulary is visible in one place.

/// Separates the kind tag from the metadata tuple: `<kind><META_DELIM><meta>...`
pub const METADATA_DELIMITER: char = '|';
/// Joins the fields of the metadata tuple (session id / message id / producer id).
pub const METADATA_SEPARATOR: char = ',';
/// Opens the payload section: `...<meta><MSG_START>payload<MSG_END>`.
pub const MSG_START_DELIMITER: char = '[';
/// Closes a frame. A byte stream is split into frames on this delimiter.
pub const MSG_END_DELIMITER: char = ']';

/// Separates record groups within a batch payload.
pub const BATCH_ITEM_SEPARATOR: char = ';';
/// Separates `"k":"v"` fields within one record group.
pub const BATCH_ITEM_FIELD_SEPARATOR: char = ',';
/// Wraps one record group: `{"k":"v",...}`.
pub const BATCH_START_DELIMITER: char = '{';
pub const BATCH_END_DELIMITER: char = '}';

/// Handshake capability string the client must present.
pub const ALL_QUERIES: &str = "ALL_QUERIES";

/// Record-kind tags, two characters, per §6 grammar.
pub const MENU_ITEMS: &str = "MIT";
pub const STORES: &str = "STR";
pub const USERS: &str = "USR";
pub const TRANSACTIONS: &str = "TRN";
pub const TRANSACTION_ITEMS: &str = "TIT";

/// Query-result tags.
pub const QUERY_RESULT_1X: &str = "Q1X";
pub const QUERY_RESULT_21: &str = "Q21";
pub const QUERY_RESULT_22: &str = "Q22";
pub const QUERY_RESULT_3X: &str = "Q3X";
pub const QUERY_RESULT_4X: &str = "Q4X";

/// Handshake and EOF use a common tag distinct from any record kind.
pub const HANDSHAKE: &str = "HND";
pub const EOF: &str = "EOF";

/// The order in which the client must stream its five record kinds.
pub const CLIENT_RECORD_KIND_ORDER: [&str; 5] =
    [MENU_ITEMS, STORES, USERS, TRANSACTIONS, TRANSACTION_ITEMS];

/// The five query-result kinds the server streams back.
pub const QUERY_RESULT_KINDS: [&str; 5] = [
    QUERY_RESULT_1X,
    QUERY_RESULT_21,
    QUERY_RESULT_22,
    QUERY_RESULT_3X,
    QUERY_RESULT_4X,
];

/// Prefix for the per-session result queue a query output builder writes to
/// and the session router reads from: `<QRS_PREFIX>-<session_id>`.
pub const QRS_PREFIX: &str = "QXX__query-results-queue";
