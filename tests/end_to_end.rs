use std::collections::HashSet;
use std::io::prelude::*;
use std::io::Cursor;

use byteorder::{ByteOrder, LittleEndian};
use zipstream::{CompressionMethod, DateTime, FileOptions, ZipArchive, ZipError, ZipWriter};

const LOREM_IPSUM: &[u8] = b"Lorem ipsum dolor sit amet, consectetur adipiscing elit. In tellus elit, tristique vitae mattis egestas, ultricies vitae risus. Quisque sit amet quam ut urna aliquet
molestie. Proin blandit ornare dui, a tempor nisl accumsan in. Praesent a consequat felis. Morbi metus diam, auctor in auctor vel, feugiat id odio. Curabitur ex ex,
dictum quis auctor quis, suscipit id lorem. Aliquam vestibulum dolor nec enim vehicula, porta tristique augue tincidunt. Vivamus ut gravida est. Sed pellentesque, dolor
vitae tristique consectetur, neque lectus pulvinar dui, sed feugiat purus diam id lectus. Class aptent taciti sociosqu ad litora torquent per conubia nostra, per
inceptos himenaeos. Maecenas feugiat velit in ex ultrices scelerisque id id neque.
";

fn fixed_time() -> DateTime {
    DateTime::from_date_and_time(1985, 10, 26, 9, 0, 0).unwrap()
}

fn stored() -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(fixed_time())
}

fn deflated() -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(fixed_time())
}

fn extract_by_name(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    archive.by_name(name).unwrap().extract(&mut out).unwrap();
    out
}

#[test]
fn single_stored_member() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let member_bytes = writer.add_bytes("bar.txt", "bar", stored()).unwrap();
    assert_eq!(member_bytes, 56);
    let total = writer.finish().unwrap();
    assert_eq!(total, 131);

    let buf = writer.into_inner().unwrap().into_inner();
    assert_eq!(buf.len(), 131);
    // local header, data descriptor, central directory, trailer
    assert_eq!(&buf[0..4], &[80, 75, 3, 4]);
    assert_eq!(&buf[40..44], &[80, 75, 7, 8]);
    assert_eq!(&buf[56..60], &[80, 75, 1, 2]);
    assert_eq!(&buf[109..113], &[80, 75, 5, 6]);
    // descriptor carries the CRC of "bar" and both sizes
    assert_eq!(LittleEndian::read_u32(&buf[44..48]), 0x76FF_8CAA);
    assert_eq!(LittleEndian::read_u32(&buf[48..52]), 3);
    assert_eq!(LittleEndian::read_u32(&buf[52..56]), 3);
    // exactly one entry
    assert_eq!(LittleEndian::read_u16(&buf[119..121]), 1);

    let mut archive = ZipArchive::new(Cursor::new(buf)).unwrap();
    assert_eq!(archive.len(), 1);
    let entry = archive.entry(0).unwrap();
    assert_eq!(entry.crc32(), 0x76FF_8CAA);
    assert_eq!(entry.compressed_size(), 3);
    assert_eq!(entry.size(), 3);
    assert_eq!(entry.compression_method(), CompressionMethod::Stored);
    assert_eq!(entry.last_modified(), fixed_time());
    assert!(entry.has_data_descriptor());
    assert_eq!(extract_by_name(&mut archive, "bar.txt"), b"bar");
}

#[test]
fn single_deflated_member() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.add_bytes("bar.txt", "bar", deflated()).unwrap();
    writer.finish().unwrap();

    let mut archive = ZipArchive::new(writer.into_inner().unwrap()).unwrap();
    let entry = archive.entry_by_name("bar.txt").unwrap();
    assert_eq!(entry.crc32(), 0x76FF_8CAA);
    assert!(entry.compressed_size() <= entry.size() + 11);
    assert_eq!(extract_by_name(&mut archive, "bar.txt"), b"bar");
}

#[test]
fn mixed_archive_with_directory() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.add_bytes("foo.txt", "foo", deflated()).unwrap();
    writer.add_bytes("bar.txt", "bar", stored()).unwrap();
    writer.add_directory("example-dir", stored()).unwrap();
    writer.finish().unwrap();

    let mut archive = ZipArchive::new(writer.into_inner().unwrap()).unwrap();
    let names: Vec<&str> = archive.entries().iter().map(|e| e.name()).collect();
    assert_eq!(names, ["foo.txt", "bar.txt", "example-dir/"]);
    let dir_flags: Vec<bool> = archive.entries().iter().map(|e| e.is_dir()).collect();
    assert_eq!(dir_flags, [false, false, true]);

    let dir = archive.entry_by_name("example-dir/").unwrap();
    assert_eq!(dir.size(), 0);
    assert_eq!(dir.compressed_size(), 0);
    assert_eq!(dir.crc32(), 0);
    assert_eq!(dir.compression_method(), CompressionMethod::Stored);
    assert_eq!(dir.external_attributes() & 1, 1);

    assert_eq!(extract_by_name(&mut archive, "foo.txt"), b"foo");
    assert_eq!(extract_by_name(&mut archive, "bar.txt"), b"bar");
}

#[test]
fn empty_archive() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    assert_eq!(writer.finish().unwrap(), 22);
    let buf = writer.into_inner().unwrap().into_inner();
    assert_eq!(buf.len(), 22);
    assert_eq!(&buf[0..4], &[80, 75, 5, 6]);
    assert!(buf[4..].iter().all(|&b| b == 0));

    let archive = ZipArchive::new(Cursor::new(buf)).unwrap();
    assert!(archive.is_empty());
    assert!(archive.comment().is_empty());
}

#[test]
fn comment_containing_trailer_magic() {
    let mut comment = vec![0x50, 0x4B, 0x05, 0x06];
    comment.extend_from_slice(&[b'x'; 50]);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.set_raw_comment(comment.clone()).unwrap();
    writer.finish().unwrap();

    let archive = ZipArchive::new(writer.into_inner().unwrap()).unwrap();
    assert!(archive.is_empty());
    assert_eq!(archive.comment(), comment.as_slice());
}

#[test]
fn maximum_length_comment_full_of_trailer_magic() {
    let comment: Vec<u8> = [0x50u8, 0x4B, 0x05, 0x06]
        .iter()
        .copied()
        .cycle()
        .take(65535)
        .collect();

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.set_raw_comment(comment.clone()).unwrap();
    writer.add_bytes("bar.txt", "bar", stored()).unwrap();
    writer.finish().unwrap();

    let mut archive = ZipArchive::new(writer.into_inner().unwrap()).unwrap();
    assert_eq!(archive.comment(), comment.as_slice());
    assert_eq!(extract_by_name(&mut archive, "bar.txt"), b"bar");
}

#[test]
fn forced_zip64_round_trip() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .add_bytes("big.bin", "0123456789", stored().large_file(true))
        .unwrap();
    writer.finish().unwrap();

    let mut archive = ZipArchive::new(writer.into_inner().unwrap()).unwrap();
    let entry = archive.entry_by_name("big.bin").unwrap();
    assert!(entry.is_zip64());
    assert_eq!(entry.size(), 10);
    assert_eq!(entry.compressed_size(), 10);
    assert_eq!(extract_by_name(&mut archive, "big.bin"), b"0123456789");

    // the member's local extras carry the widened-size record
    let fields = archive.local_extra_fields(0).unwrap();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].header_id, 0x0001);
    assert_eq!(fields[0].data.len(), 16);
}

#[test]
fn empty_member_deflates_to_nothing() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.add_bytes("empty.txt", "", deflated()).unwrap();
    writer.finish().unwrap();

    let mut archive = ZipArchive::new(writer.into_inner().unwrap()).unwrap();
    let entry = archive.entry_by_name("empty.txt").unwrap();
    assert_eq!(entry.size(), 0);
    assert!(entry.compressed_size() > 0);
    assert_eq!(entry.crc32(), 0);
    assert_eq!(extract_by_name(&mut archive, "empty.txt"), b"");
}

#[test]
fn bodies_larger_than_the_pipeline_buffer() {
    let mut body = Vec::new();
    while body.len() < 100 * 1024 {
        body.extend_from_slice(LOREM_IPSUM);
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.add_bytes("lorem-deflated.txt", &body, deflated()).unwrap();
    writer.add_bytes("lorem-stored.txt", &body, stored()).unwrap();
    writer.finish().unwrap();

    let mut archive = ZipArchive::new(writer.into_inner().unwrap()).unwrap();
    let deflated_entry = archive.entry_by_name("lorem-deflated.txt").unwrap();
    assert!(deflated_entry.compressed_size() < deflated_entry.size());
    assert_eq!(extract_by_name(&mut archive, "lorem-deflated.txt"), body);
    assert_eq!(extract_by_name(&mut archive, "lorem-stored.txt"), body);
}

#[test]
fn round_trip_preserves_member_metadata() {
    let time = DateTime::from_date_and_time(2001, 2, 3, 4, 5, 6).unwrap();
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .add_bytes(
            "docs/readme.md",
            LOREM_IPSUM,
            FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .last_modified_time(time)
                .comment("release notes"),
        )
        .unwrap();
    writer.finish().unwrap();

    let mut archive = ZipArchive::new(writer.into_inner().unwrap()).unwrap();
    let entry = archive.entry_by_name("docs/readme.md").unwrap();
    assert_eq!(entry.compression_method(), CompressionMethod::Deflated);
    assert_eq!(entry.last_modified(), time);
    assert_eq!(entry.comment(), b"release notes");
    assert!(!entry.is_utf8());
    assert_eq!(extract_by_name(&mut archive, "docs/readme.md"), LOREM_IPSUM);
}

#[test]
fn non_ascii_names_set_the_unicode_flag() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.add_bytes("test/☃.txt", "snow", stored()).unwrap();
    writer.add_bytes("plain.txt", "text", stored()).unwrap();
    writer.finish().unwrap();

    let mut archive = ZipArchive::new(writer.into_inner().unwrap()).unwrap();
    assert!(archive.entry_by_name("test/☃.txt").unwrap().is_utf8());
    assert!(!archive.entry_by_name("plain.txt").unwrap().is_utf8());
    assert_eq!(extract_by_name(&mut archive, "test/☃.txt"), b"snow");
}

#[test]
fn duplicate_names_resolve_to_the_first_member() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.add_bytes("same.txt", "first", stored()).unwrap();
    writer.add_bytes("same.txt", "second", stored()).unwrap();
    writer.finish().unwrap();

    let mut archive = ZipArchive::new(writer.into_inner().unwrap()).unwrap();
    assert_eq!(archive.len(), 2);
    assert_eq!(extract_by_name(&mut archive, "same.txt"), b"first");

    let mut out = Vec::new();
    archive.by_index(1).unwrap().extract(&mut out).unwrap();
    assert_eq!(out, b"second");
}

#[test]
fn entries_can_be_read_through_the_read_trait() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .add("lorem.txt", &LOREM_IPSUM[..], deflated())
        .unwrap();
    writer.finish().unwrap();

    let mut archive = ZipArchive::new(writer.into_inner().unwrap()).unwrap();
    let mut contents = String::new();
    archive
        .by_name("lorem.txt")
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    assert_eq!(contents.as_bytes(), LOREM_IPSUM);

    let expected: HashSet<&str> = ["lorem.txt"].into_iter().collect();
    assert_eq!(archive.file_names().collect::<HashSet<_>>(), expected);
}

#[test]
fn plain_members_have_no_local_extras() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.add_bytes("a.txt", "a", stored()).unwrap();
    writer.finish().unwrap();

    let mut archive = ZipArchive::new(writer.into_inner().unwrap()).unwrap();
    assert!(archive.local_extra_fields(0).unwrap().is_empty());
    // memoized: a second fetch sees the same answer
    assert!(archive.local_extra_fields(0).unwrap().is_empty());
}

#[test]
fn truncated_archives_are_rejected() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.add_bytes("bar.txt", "bar", stored()).unwrap();
    writer.finish().unwrap();
    let mut buf = writer.into_inner().unwrap().into_inner();

    // chop off the trailer: no end-of-central-directory record remains
    buf.truncate(buf.len() - 22);
    assert!(matches!(
        ZipArchive::new(Cursor::new(buf)),
        Err(ZipError::Format(_) | ZipError::Truncated(_))
    ));
}

#[test]
fn structural_invariants_hold() {
    let comment = b"archive comment".to_vec();
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.set_raw_comment(comment.clone()).unwrap();
    writer.add_bytes("one.txt", "first body", deflated()).unwrap();
    writer.add_bytes("two/three.txt", "second body", stored()).unwrap();
    writer.add_directory("two", stored()).unwrap();
    writer.finish().unwrap();
    let buf = writer.into_inner().unwrap().into_inner();

    // the trailer magic sits exactly where the comment length says
    let eocd = buf.len() - 22 - comment.len();
    assert_eq!(LittleEndian::read_u32(&buf[eocd..eocd + 4]), 0x06054B50);
    assert_eq!(
        LittleEndian::read_u16(&buf[eocd + 20..eocd + 22]) as usize,
        comment.len()
    );

    // walk the central directory: the recorded count matches, and every
    // entry points at a local header with the same name
    let cdr_len = LittleEndian::read_u32(&buf[eocd + 12..eocd + 16]) as usize;
    let cdr_offset = LittleEndian::read_u32(&buf[eocd + 16..eocd + 20]) as usize;
    let declared = LittleEndian::read_u16(&buf[eocd + 10..eocd + 12]);
    assert_eq!(cdr_offset + cdr_len, eocd);

    let mut pos = cdr_offset;
    let mut seen = 0u16;
    while pos < cdr_offset + cdr_len {
        assert_eq!(LittleEndian::read_u32(&buf[pos..pos + 4]), 0x02014B50);
        let name_len = LittleEndian::read_u16(&buf[pos + 28..pos + 30]) as usize;
        let extra_len = LittleEndian::read_u16(&buf[pos + 30..pos + 32]) as usize;
        let comment_len = LittleEndian::read_u16(&buf[pos + 32..pos + 34]) as usize;
        let header_offset = LittleEndian::read_u32(&buf[pos + 42..pos + 46]) as usize;
        let name = &buf[pos + 46..pos + 46 + name_len];

        assert_eq!(
            LittleEndian::read_u32(&buf[header_offset..header_offset + 4]),
            0x04034B50
        );
        let local_name_len =
            LittleEndian::read_u16(&buf[header_offset + 26..header_offset + 28]) as usize;
        assert_eq!(local_name_len, name_len);
        assert_eq!(&buf[header_offset + 30..header_offset + 30 + name_len], name);

        pos += 46 + name_len + extra_len + comment_len;
        seen += 1;
    }
    assert_eq!(pos, cdr_offset + cdr_len);
    assert_eq!(seen, declared);
}

#[test]
fn zip64_entry_count_boundary() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for i in 0..65535u32 {
        writer
            .add_bytes(format!("m{:05}", i), "", stored())
            .unwrap();
    }
    writer.finish().unwrap();
    let buf = writer.into_inner().unwrap().into_inner();

    // classic counts are pinned at the sentinel
    let eocd = buf.len() - 22;
    assert_eq!(LittleEndian::read_u16(&buf[eocd + 8..eocd + 10]), 0xFFFF);
    assert_eq!(LittleEndian::read_u16(&buf[eocd + 10..eocd + 12]), 0xFFFF);
    // a zip64 trailer precedes the locator and the classic record
    let locator = eocd - 20;
    assert_eq!(LittleEndian::read_u32(&buf[locator..locator + 4]), 0x07064B50);
    let zip64_eocd = LittleEndian::read_u64(&buf[locator + 8..locator + 16]) as usize;
    assert_eq!(
        LittleEndian::read_u32(&buf[zip64_eocd..zip64_eocd + 4]),
        0x06064B50
    );

    let mut archive = ZipArchive::new(Cursor::new(buf)).unwrap();
    assert_eq!(archive.len(), 65535);
    assert_eq!(extract_by_name(&mut archive, "m00000"), b"");
    assert_eq!(archive.entry(65534).unwrap().name(), "m65534");
}

#[test]
fn archives_survive_the_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.zip");

    let mut writer = ZipWriter::create(&path).unwrap();
    writer.add_directory("test", stored()).unwrap();
    writer.add_bytes("test/lorem.txt", LOREM_IPSUM, deflated()).unwrap();
    writer.finish().unwrap();
    drop(writer);

    let mut archive = ZipArchive::open(&path).unwrap();
    assert_eq!(archive.len(), 2);

    let out_dir = dir.path().join("out");
    archive.extract(&out_dir).unwrap();
    let on_disk = std::fs::read(out_dir.join("test/lorem.txt")).unwrap();
    assert_eq!(on_disk, LOREM_IPSUM);
}
