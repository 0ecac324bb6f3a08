use crate::backend::{ColumnDesc, ColumnKind};
use mysql_common::constants::{ColumnFlags, ColumnType};

/// Backend column kind to the MySQL column-type byte of a
/// ColumnDefinition41. Anything without a closer match renders as VARCHAR.
pub fn mysql_type_byte(kind: ColumnKind) -> ColumnType {
    match kind {
        ColumnKind::Bit => ColumnType::MYSQL_TYPE_BIT,
        ColumnKind::TinyInt | ColumnKind::Bool => ColumnType::MYSQL_TYPE_TINY,
        ColumnKind::SmallInt => ColumnType::MYSQL_TYPE_SHORT,
        ColumnKind::Int => ColumnType::MYSQL_TYPE_LONG,
        ColumnKind::BigInt => ColumnType::MYSQL_TYPE_LONGLONG,
        ColumnKind::Float => ColumnType::MYSQL_TYPE_FLOAT,
        ColumnKind::Double => ColumnType::MYSQL_TYPE_DOUBLE,
        ColumnKind::Decimal => ColumnType::MYSQL_TYPE_DECIMAL,
        ColumnKind::Date => ColumnType::MYSQL_TYPE_DATE,
        ColumnKind::Time => ColumnType::MYSQL_TYPE_TIME,
        ColumnKind::Timestamp => ColumnType::MYSQL_TYPE_DATETIME,
        ColumnKind::Char | ColumnKind::Varchar | ColumnKind::Text => {
            ColumnType::MYSQL_TYPE_VARCHAR
        }
        ColumnKind::Blob => ColumnType::MYSQL_TYPE_BLOB,
    }
}

pub fn mysql_column_flags(c: &ColumnDesc) -> ColumnFlags {
    let mut flags = ColumnFlags::empty();
    if !c.nullable {
        flags |= ColumnFlags::NOT_NULL_FLAG;
    }
    if c.auto_increment {
        flags |= ColumnFlags::AUTO_INCREMENT_FLAG;
    }
    if !c.signed {
        flags |= ColumnFlags::UNSIGNED_FLAG;
    }
    flags
}

/// Declared display length of a column definition. Clients only use it for
/// layout, so the rules stay simple.
pub fn mysql_display_len(c: &ColumnDesc) -> u32 {
    match c.kind {
        ColumnKind::Int | ColumnKind::BigInt => 11,
        ColumnKind::Date => 10,
        ColumnKind::Timestamp => 19,
        ColumnKind::Decimal => u32::from(c.precision) + 2,
        ColumnKind::Char | ColumnKind::Varchar if c.display_size > 0 => c.display_size,
        _ => 255,
    }
}

/// Backend column kind to the PostgreSQL type OID used in RowDescription.
/// All values travel in text format; unmapped kinds degrade to `text`.
pub fn postgres_type_oid(kind: ColumnKind) -> u32 {
    match kind {
        ColumnKind::Bool => 16,
        ColumnKind::SmallInt | ColumnKind::TinyInt => 21,
        ColumnKind::Int => 23,
        ColumnKind::BigInt => 20,
        ColumnKind::Float => 700,
        ColumnKind::Double => 701,
        ColumnKind::Decimal => 1700,
        ColumnKind::Char => 1042,
        ColumnKind::Varchar => 1043,
        ColumnKind::Date => 1082,
        ColumnKind::Time => 1083,
        ColumnKind::Timestamp => 1114,
        ColumnKind::Blob => 17,
        ColumnKind::Bit | ColumnKind::Text => 25,
    }
}

/// Type size paired with the OID: the fixed width for fixed types, −1 for
/// variable-length ones.
pub fn postgres_type_size(kind: ColumnKind) -> i16 {
    match kind {
        ColumnKind::Bool => 1,
        ColumnKind::SmallInt | ColumnKind::TinyInt => 2,
        ColumnKind::Int => 4,
        ColumnKind::BigInt => 8,
        ColumnKind::Float => 4,
        ColumnKind::Double => 8,
        ColumnKind::Date => 4,
        ColumnKind::Time | ColumnKind::Timestamp => 8,
        _ => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_type_bytes_follow_the_table() {
        assert_eq!(mysql_type_byte(ColumnKind::Bit) as u8, 0x10);
        assert_eq!(mysql_type_byte(ColumnKind::TinyInt) as u8, 0x01);
        assert_eq!(mysql_type_byte(ColumnKind::SmallInt) as u8, 0x02);
        assert_eq!(mysql_type_byte(ColumnKind::Int) as u8, 0x03);
        assert_eq!(mysql_type_byte(ColumnKind::BigInt) as u8, 0x08);
        assert_eq!(mysql_type_byte(ColumnKind::Float) as u8, 0x04);
        assert_eq!(mysql_type_byte(ColumnKind::Double) as u8, 0x05);
        assert_eq!(mysql_type_byte(ColumnKind::Decimal) as u8, 0x00);
        assert_eq!(mysql_type_byte(ColumnKind::Date) as u8, 0x0a);
        assert_eq!(mysql_type_byte(ColumnKind::Time) as u8, 0x0b);
        assert_eq!(mysql_type_byte(ColumnKind::Timestamp) as u8, 0x0c);
        assert_eq!(mysql_type_byte(ColumnKind::Varchar) as u8, 0x0f);
        assert_eq!(mysql_type_byte(ColumnKind::Text) as u8, 0x0f);
        assert_eq!(mysql_type_byte(ColumnKind::Blob) as u8, 0xfc);
    }

    #[test]
    fn test_mysql_flags() {
        let mut col = ColumnDesc::named("id", ColumnKind::Int);
        col.nullable = false;
        col.auto_increment = true;
        col.signed = false;
        let flags = mysql_column_flags(&col);
        assert!(flags.contains(ColumnFlags::NOT_NULL_FLAG));
        assert!(flags.contains(ColumnFlags::AUTO_INCREMENT_FLAG));
        assert!(flags.contains(ColumnFlags::UNSIGNED_FLAG));

        let plain = ColumnDesc::named("v", ColumnKind::Varchar);
        assert!(mysql_column_flags(&plain).is_empty());
    }

    #[test]
    fn test_mysql_display_len() {
        assert_eq!(mysql_display_len(&ColumnDesc::named("a", ColumnKind::Int)), 11);
        assert_eq!(
            mysql_display_len(&ColumnDesc::named("a", ColumnKind::Date)),
            10
        );
        assert_eq!(
            mysql_display_len(&ColumnDesc::named("a", ColumnKind::Timestamp)),
            19
        );
        let mut dec = ColumnDesc::named("a", ColumnKind::Decimal);
        dec.precision = 10;
        assert_eq!(mysql_display_len(&dec), 12);
        let mut vc = ColumnDesc::named("a", ColumnKind::Varchar);
        vc.display_size = 64;
        assert_eq!(mysql_display_len(&vc), 64);
        assert_eq!(
            mysql_display_len(&ColumnDesc::named("a", ColumnKind::Blob)),
            255
        );
    }

    #[test]
    fn test_postgres_oids_follow_the_table() {
        assert_eq!(postgres_type_oid(ColumnKind::Bool), 16);
        assert_eq!(postgres_type_oid(ColumnKind::SmallInt), 21);
        assert_eq!(postgres_type_oid(ColumnKind::Int), 23);
        assert_eq!(postgres_type_oid(ColumnKind::BigInt), 20);
        assert_eq!(postgres_type_oid(ColumnKind::Float), 700);
        assert_eq!(postgres_type_oid(ColumnKind::Double), 701);
        assert_eq!(postgres_type_oid(ColumnKind::Decimal), 1700);
        assert_eq!(postgres_type_oid(ColumnKind::Char), 1042);
        assert_eq!(postgres_type_oid(ColumnKind::Varchar), 1043);
        assert_eq!(postgres_type_oid(ColumnKind::Date), 1082);
        assert_eq!(postgres_type_oid(ColumnKind::Time), 1083);
        assert_eq!(postgres_type_oid(ColumnKind::Timestamp), 1114);
        assert_eq!(postgres_type_oid(ColumnKind::Blob), 17);
        assert_eq!(postgres_type_oid(ColumnKind::Text), 25);
    }

    #[test]
    fn test_postgres_sizes() {
        assert_eq!(postgres_type_size(ColumnKind::Bool), 1);
        assert_eq!(postgres_type_size(ColumnKind::Int), 4);
        assert_eq!(postgres_type_size(ColumnKind::BigInt), 8);
        assert_eq!(postgres_type_size(ColumnKind::Varchar), -1);
        assert_eq!(postgres_type_size(ColumnKind::Decimal), -1);
    }
}
