mod support;

use kdwalk::kernel::ssdt::{ServiceTable, SsdtError};
use kdwalk::samples;
use support::{HeaderStyle, KernelImage};

fn output(f: impl FnOnce(&mut Vec<u8>)) -> String {
    let mut out = Vec::new();
    f(&mut out);
    String::from_utf8(out).unwrap()
}

#[test]
fn drvobj_prints_dispatch_table_and_missing_driver() {
    let mut image = KernelImage::win10();
    let dispatch = 0xfffff800_20001000;
    let invalid = 0xfffff800_30000000;
    image.add_symbol("afd!AfdDispatch", dispatch);
    image.add_symbol("nt!IopInvalidDeviceRequest", invalid);

    let mut routines = vec![invalid; 28];
    routines[0] = dispatch;
    routines[14] = dispatch + 0x40;

    let root = image.root;
    let driver_dir = image.directory(root, 5, "Driver");
    let afd = image.driver(driver_dir, 0, "afd", &routines);
    let target = image.into_target();

    let text = output(|out| samples::run("km.drvobj", &target, out, &[]).unwrap());
    let lines: Vec<_> = text.lines().collect();

    assert_eq!(lines[0], format!("\\Driver\\afd {:x}", afd));
    assert_eq!(lines[1], "MajorFunction[0] = afd!AfdDispatch");
    assert_eq!(lines[2], "MajorFunction[1] = nt!IopInvalidDeviceRequest");
    assert_eq!(lines[15], "MajorFunction[14] = afd!AfdDispatch+0x40");
    assert_eq!(lines[28], "MajorFunction[27] = nt!IopInvalidDeviceRequest");
    // ntfs is not present
    assert_eq!(lines[29], "object not found");
    assert_eq!(lines.len(), 30);
}

#[test]
fn drvobj_takes_driver_names() {
    let mut image = KernelImage::new(8, HeaderStyle::Legacy);
    let root = image.root;
    let driver_dir = image.directory(root, 1, "Driver");
    let ntfs = image.driver(driver_dir, 3, "Ntfs", &[]);
    let target = image.into_target();

    let text = output(|out| {
        samples::run("km.drvobj", &target, out, &["NTFS".to_string()]).unwrap()
    });
    assert!(text.starts_with(&format!("\\Driver\\NTFS {:x}\n", ntfs)));
    assert_eq!(text.lines().count(), 29);
}

#[test]
fn ssdt_decodes_x64_offsets() {
    let mut image = KernelImage::win10();
    let table = image.service_table(&[0, 0]);
    let forward = table + 0x1000;
    let backward = table - 0x2000;

    // (displacement << 4) | stack argument count
    let entries = [(0x1000i32 << 4) | 3, (-0x2000i32 << 4) | 2];
    for (i, value) in entries.iter().enumerate() {
        image.write_u32(table + i as u64 * 4, *value as u32);
    }
    image.add_symbol("nt!NtAccessCheck", forward);
    image.add_symbol("nt!NtWaitForSingleObject", backward);
    let target = image.into_target();

    let decoded = ServiceTable::read(&target).unwrap();
    assert_eq!(decoded.routines, vec![forward, backward]);

    let text = output(|out| samples::run("km.ssdt", &target, out, &[]).unwrap());
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines[0], format!("ServiceTable  start: {:x}  count: 2", table));
    assert_eq!(lines[1], format!("[0] nt!NtAccessCheck ({:x})", forward));
    assert_eq!(lines[2], format!("[1] nt!NtWaitForSingleObject ({:x})", backward));
}

#[test]
fn ssdt_masks_offsets_on_server_2003() {
    let mut image = KernelImage::new(
        8,
        HeaderStyle::Indexed {
            build: 3790,
            cookie: 0,
        },
    );
    let table = image.service_table(&[0x1230 | 4]);
    let target = image.into_target();

    let decoded = ServiceTable::read(&target).unwrap();
    assert_eq!(decoded.routines, vec![table + 0x1230]);
}

#[test]
fn ssdt_reads_absolute_pointers_on_x86() {
    let mut image = KernelImage::new(
        4,
        HeaderStyle::Indexed {
            build: 7601,
            cookie: 0,
        },
    );
    image.add_symbol("nt!NtAcceptConnectPort", 0x8284_0000);
    let table = image.service_table(&[0x8284_0000, 0x8284_0010]);
    let target = image.into_target();

    let text = output(|out| samples::run("km.ssdt", &target, out, &[]).unwrap());
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines[0], format!("ServiceTable  start: {:x}  count: 2", table));
    assert_eq!(lines[1], "[0] nt!NtAcceptConnectPort");
    assert_eq!(lines[2], "[1] nt!NtAcceptConnectPort+0x10");
}

#[test]
fn ssdt_rejects_implausible_count() {
    let mut image = KernelImage::win10();
    image.service_table(&[0]);
    let descriptor = image.symbol("nt!KeServiceDescriptorTable");
    image.write_ptr(descriptor + 16, 0x10_0000);
    let target = image.into_target();

    assert!(matches!(
        ServiceTable::read(&target),
        Err(SsdtError::ImplausibleCount(0x10_0000))
    ));
}
