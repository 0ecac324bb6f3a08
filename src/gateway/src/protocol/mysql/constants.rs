use num_derive::{FromPrimitive, ToPrimitive};
use strum_macros::AsRefStr;

// Max packet payload length. A logical message longer than this is split at
// the boundary and stitched back together by the reader.
// See: https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html
pub const MAX_PAYLOAD_LEN: usize = 16_777_215;

pub const PACKET_HEADER_LEN: usize = 4;

/// auth-plugin-data-part-1: the first 8 bytes of the scramble sent in the
/// initial handshake.
pub const AUTH_PLUGIN_DATA_PART_1_LENGTH: usize = 8;
/// Full scramble length (auth-plugin-data-part-1 + auth-plugin-data-part-2).
pub const SCRAMBLE_SIZE: usize = 20;

#[derive(Debug, PartialEq, AsRefStr)]
pub enum AuthPluginName {
    #[strum(serialize = "mysql_old_password")]
    AuthMySQlOldPassword,
    #[strum(serialize = "caching_sha2_password")]
    AuthCachingSha2Password,
    #[strum(serialize = "sha256_password")]
    AuthSha256Password,
    #[strum(serialize = "mysql_native_password")]
    AuthNativePassword,
}

#[derive(Debug, PartialEq, ToPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum HeaderInfo {
    OKHeader = 0x00,
    LocalInFileHeader = 0xfb,
    EOFHeader = 0xfe,
    ErrHeader = 0xff,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, FromPrimitive, ToPrimitive, AsRefStr)]
#[repr(u8)]
pub enum CommandCode {
    ComSleep = 0,
    ComQuit,
    ComInitDB,
    ComQuery,
    ComFieldList,
    ComCreateDB,
    ComDropDB,
    ComRefresh,
    ComShutdown,
    ComStatistics,
    ComProcessInfo,
    ComConnect,
    ComProcessKill,
    ComDebug,
    ComPing,
    ComTime,
    ComDelayedInsert,
    ComChangeUser,
    ComBinlogDump,
    ComTableDump,
    ComConnectOut,
    ComRegisterSlave,
    ComStmtPrepare,
    ComStmtExecute,
    ComStmtSendLongData,
    ComStmtClose,
    ComStmtReset,
    ComSetOption,
    ComStmtFetch,
    ComDaemon,
    ComBinlogDumpGtid,
    ComResetConnection,
    ComEnd,
}
