use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use lazyfs::Errno;
use lazyfs::EntryKind;
use lazyfs::Error;
use lazyfs::FileKind;
use lazyfs::HostDir;
use lazyfs::HostFile;
use lazyfs::HostIdent;
use lazyfs::HostNode;
use lazyfs::LazyFs;
use lazyfs::MANIFEST_NAME;
use lazyfs::Manifest;
use lazyfs::ManifestEntry;
use lazyfs::MountParams;
use lazyfs::NodeId;
use lazyfs::OpenFlags;
use lazyfs::mount;
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn write_manifest(dir: &Path, entries: &[(EntryKind, &str)]) {
    let manifest = Manifest::Static(
        entries
            .iter()
            .map(|&(kind, name)| ManifestEntry::new(kind, name))
            .collect(),
    );
    fs::write(dir.join(MANIFEST_NAME), manifest.to_bytes()).unwrap();
}

fn replace_manifest(dir: &Path, entries: &[(EntryKind, &str)]) {
    let manifest = Manifest::Static(
        entries
            .iter()
            .map(|&(kind, name)| ManifestEntry::new(kind, name))
            .collect(),
    );
    let staged = dir.join(".manifest.new");
    fs::write(&staged, manifest.to_bytes()).unwrap();
    fs::rename(&staged, dir.join(MANIFEST_NAME)).unwrap();
}

fn mount_over(tmp: &TempDir) -> LazyFs {
    mount(MountParams::from_path(tmp.path()).unwrap()).unwrap()
}

/// Walk `path` from the root, one lookup per segment.
fn resolve(fs: &LazyFs, path: &str) -> lazyfs::Result<Option<NodeId>> {
    let req = fs.request();
    let mut cursor = fs.root();
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        match fs.lookup(&req, cursor, OsStr::new(segment))? {
            Some(next) => cursor = next,
            None => return Ok(None),
        }
    }
    Ok(Some(cursor))
}

fn read_all(fs: &LazyFs, ino: NodeId) -> Vec<u8> {
    let handle = fs.open(&fs.request(), ino, OpenFlags::read_only()).unwrap();
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let got = handle.read(out.len() as u64, &mut buf).unwrap();
        if got == 0 {
            break;
        }
        out.extend_from_slice(&buf[..got]);
    }
    out
}

#[test]
fn cold_lookup_without_helper() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("README"), b"read me").unwrap();
    write_manifest(
        tmp.path(),
        &[
            (EntryKind::Regular, "README"),
            (EntryKind::Regular, "missing"),
        ],
    );
    let fs = mount_over(&tmp);

    let readme = resolve(&fs, "/README").unwrap().unwrap();
    assert_eq!(read_all(&fs, readme), b"read me");

    // Not in the listing at all: a plain negative lookup.
    assert_eq!(resolve(&fs, "/unlisted").unwrap(), None);

    // Listed but absent from the host, and nobody to fetch it.
    let missing = resolve(&fs, "/missing").unwrap().unwrap();
    let err = fs
        .open(&fs.request(), missing, OpenFlags::read_only())
        .unwrap_err();
    assert!(matches!(err, Error::NoHelper));
    assert_eq!(err.errno(), Errno::EIO);
}

#[test]
fn missing_listing_is_an_io_error() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir(tmp.path().join("bare")).unwrap();
    write_manifest(tmp.path(), &[(EntryKind::Directory, "bare")]);
    let fs = mount_over(&tmp);

    let bare = resolve(&fs, "/bare").unwrap().unwrap();
    let err = fs.opendir(&fs.request(), bare).unwrap_err();
    assert!(matches!(err, Error::NoManifest));
    assert_eq!(err.errno(), Errno::EIO);
}

#[test]
fn helper_satisfies_cold_lookup() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir(tmp.path().join("pkg")).unwrap();
    write_manifest(tmp.path(), &[(EntryKind::Directory, "pkg")]);
    write_manifest(&tmp.path().join("pkg"), &[(EntryKind::Directory, "bin")]);
    let fs = Arc::new(mount_over(&tmp));
    let helper = fs.open_helper().unwrap();

    let user = {
        let fs = fs.clone();
        thread::spawn(move || {
            let req = fs.request_from(1000, 1000);
            let mut cursor = fs.root();
            for segment in ["pkg", "bin", "tool"] {
                cursor = fs
                    .lookup(&req, cursor, OsStr::new(segment))?
                    .ok_or(Error::NoHelper)?;
            }
            let handle = fs.open(&req, cursor, OpenFlags::read_only())?;
            let mut buf = [0u8; 32];
            let got = handle.read(0, &mut buf)?;
            Ok::<Vec<u8>, Error>(buf[..got].to_vec())
        })
    };

    let mut buf = [0u8; 64];
    let n = helper.read_request(&fs.request(), &mut buf).unwrap();
    assert_eq!(buf[n - 1], 0);
    let message = std::str::from_utf8(&buf[..n - 1]).unwrap();
    assert_eq!(message, "3 uid=1000");

    let request = helper.request(3).unwrap();
    assert_eq!(request.path(), OsStr::new("/pkg/bin"));
    let mut path_buf = [0u8; 16];
    let got = request.read(0, &mut path_buf);
    assert_eq!(&path_buf[..got], b"/pkg/bin\0");
    drop(request);

    let bin = tmp.path().join("pkg/bin");
    fs::create_dir(&bin).unwrap();
    write_manifest(&bin, &[(EntryKind::Executable, "tool")]);
    fs::write(bin.join("tool"), b"#!tool").unwrap();
    fs::set_permissions(bin.join("tool"), fs::Permissions::from_mode(0o755)).unwrap();
    assert!(helper.close_request(3));

    assert_eq!(user.join().unwrap().unwrap(), b"#!tool");
}

#[test]
fn helper_departure_drains_pending_fetches() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir(tmp.path().join("a")).unwrap();
    write_manifest(tmp.path(), &[(EntryKind::Directory, "a")]);
    write_manifest(
        &tmp.path().join("a"),
        &[(EntryKind::Directory, "b"), (EntryKind::Directory, "c")],
    );
    let fs = Arc::new(mount_over(&tmp));
    let helper = fs.open_helper().unwrap();

    let mut users = Vec::new();
    for path in ["/a/b", "/a/c"] {
        let fs = fs.clone();
        users.push(thread::spawn(move || -> lazyfs::Result<()> {
            let ino = resolve(&fs, path)?.ok_or(Error::NoHelper)?;
            fs.opendir(&fs.request(), ino).map(drop)
        }));
    }
    thread::sleep(Duration::from_millis(100));
    drop(helper);

    for user in users {
        let err = user.join().unwrap().unwrap_err();
        assert_eq!(err.errno(), Errno::EIO);
    }

    // Until a new helper binds, fetches are refused outright.
    let b = resolve(&fs, "/a/b").unwrap().unwrap();
    let err = fs.opendir(&fs.request(), b).unwrap_err();
    assert!(matches!(err, Error::NoHelper));

    let helper = fs.open_helper().unwrap();
    drop(helper);
}

#[test]
fn concurrent_producers_share_one_fetch() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir(tmp.path().join("x")).unwrap();
    write_manifest(tmp.path(), &[(EntryKind::Directory, "x")]);
    write_manifest(&tmp.path().join("x"), &[(EntryKind::Regular, "y")]);
    let fs = Arc::new(mount_over(&tmp));
    let helper = fs.open_helper().unwrap();

    let mut users = Vec::new();
    for _ in 0..2 {
        let fs = fs.clone();
        users.push(thread::spawn(move || {
            let ino = resolve(&fs, "/x/y")?.ok_or(Error::NoHelper)?;
            Ok::<Vec<u8>, Error>(read_all(&fs, ino))
        }));
    }
    thread::sleep(Duration::from_millis(100));

    let mut buf = [0u8; 64];
    let n = helper.read_request(&fs.request(), &mut buf).unwrap();
    let message = std::str::from_utf8(&buf[..n - 1]).unwrap();
    let id: u64 = message.split_whitespace().next().unwrap().parse().unwrap();
    assert_eq!(
        helper.request(id).unwrap().path(),
        OsStr::new("/x/y")
    );
    fs::write(tmp.path().join("x/y"), b"shared outcome").unwrap();
    helper.close_request(id);

    for user in users {
        assert_eq!(user.join().unwrap().unwrap(), b"shared outcome");
    }

    // Exactly one request was delivered; the queue is dry now.
    let drained = fs.request();
    drained.interrupt().raise();
    assert!(matches!(
        helper.read_request(&drained, &mut buf),
        Err(Error::Interrupted)
    ));
}

#[test]
fn listing_hot_swap_shows_new_entries() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir(tmp.path().join("d")).unwrap();
    write_manifest(tmp.path(), &[(EntryKind::Directory, "d")]);
    write_manifest(
        &tmp.path().join("d"),
        &[(EntryKind::Regular, "a"), (EntryKind::Regular, "b")],
    );
    let fs = mount_over(&tmp);
    let req = fs.request();

    let d = resolve(&fs, "/d").unwrap().unwrap();
    let before = fs.opendir(&req, d).unwrap();
    let names: Vec<_> = before.readdir(2).iter().map(|e| e.name.clone()).collect();
    assert_eq!(names, ["a", "b"]);

    replace_manifest(
        &tmp.path().join("d"),
        &[(EntryKind::Regular, "a"), (EntryKind::Regular, "c")],
    );

    let after = fs.opendir(&req, d).unwrap();
    let names: Vec<_> = after.readdir(2).iter().map(|e| e.name.clone()).collect();
    assert!(names.contains(&"a".into()));
    assert!(names.contains(&"c".into()));

    // The old stream is a snapshot of its open moment.
    let names: Vec<_> = before.readdir(2).iter().map(|e| e.name.clone()).collect();
    assert_eq!(names, ["a", "b"]);
}

#[test]
fn mmap_aliases_once_and_only_once() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("data"), b"mapped bytes").unwrap();
    write_manifest(tmp.path(), &[(EntryKind::Regular, "data")]);
    let fs = mount_over(&tmp);
    let req = fs.request();

    let data = resolve(&fs, "/data").unwrap().unwrap();
    let first = fs.open(&req, data, OpenFlags::read_only()).unwrap();
    let mapping = first.mmap().unwrap();
    assert_eq!(mapping.bytes(), b"mapped bytes");
    assert!(Arc::ptr_eq(&mapping, &first.mmap().unwrap()));

    // A second open of the same host file shares the aliased mapping.
    let second = fs.open(&req, data, OpenFlags::read_only()).unwrap();
    assert!(Arc::ptr_eq(&mapping, &second.mmap().unwrap()));

    // Replace the host file; the node must not be re-aliased.
    fs::write(tmp.path().join("data.new"), b"other bytes").unwrap();
    fs::rename(tmp.path().join("data.new"), tmp.path().join("data")).unwrap();
    let third = fs.open(&req, data, OpenFlags::read_only()).unwrap();
    let err = third.mmap().unwrap_err();
    assert!(matches!(err, Error::Busy));
    assert_eq!(err.errno(), Errno::EBUSY);
}

#[test]
fn listing_size_cap_is_exact() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    for dir in ["at_cap", "over_cap"] {
        fs::create_dir(tmp.path().join(dir)).unwrap();
    }
    write_manifest(
        tmp.path(),
        &[
            (EntryKind::Directory, "at_cap"),
            (EntryKind::Directory, "over_cap"),
        ],
    );

    // magic + kind byte + name + NUL == 100 KiB exactly.
    let name = "n".repeat(100 * 1024 - 9);
    let listing = Manifest::Static(vec![ManifestEntry::new(EntryKind::Regular, name.as_str())]);
    assert_eq!(listing.to_bytes().len(), 100 * 1024);
    fs::write(tmp.path().join("at_cap").join(MANIFEST_NAME), listing.to_bytes()).unwrap();

    let long = "n".repeat(100 * 1024 - 8);
    let listing = Manifest::Static(vec![ManifestEntry::new(EntryKind::Regular, long.as_str())]);
    assert_eq!(listing.to_bytes().len(), 100 * 1024 + 1);
    fs::write(
        tmp.path().join("over_cap").join(MANIFEST_NAME),
        listing.to_bytes(),
    )
    .unwrap();

    let fs = mount_over(&tmp);
    let req = fs.request();

    let at_cap = resolve(&fs, "/at_cap").unwrap().unwrap();
    let stream = fs.opendir(&req, at_cap).unwrap();
    assert_eq!(stream.readdir(2).len(), 1);

    let over_cap = resolve(&fs, "/over_cap").unwrap().unwrap();
    let err = fs.opendir(&req, over_cap).unwrap_err();
    assert!(matches!(err, Error::TooLarge));
    assert_eq!(err.errno(), Errno::E2BIG);
}

#[test]
fn unterminated_listing_is_invalid() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir(tmp.path().join("bad")).unwrap();
    write_manifest(tmp.path(), &[(EntryKind::Directory, "bad")]);
    fs::write(tmp.path().join("bad").join(MANIFEST_NAME), b"LazyFS\nfREADME").unwrap();

    let fs = mount_over(&tmp);
    let bad = resolve(&fs, "/bad").unwrap().unwrap();
    let err = fs.opendir(&fs.request(), bad).unwrap_err();
    assert!(matches!(err, Error::InvalidManifest));
    assert_eq!(err.errno(), Errno::EIO);
}

#[test]
fn dynamic_directory_fetches_on_lookup() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir(tmp.path().join("dyn")).unwrap();
    write_manifest(tmp.path(), &[(EntryKind::Directory, "dyn")]);
    fs::write(
        tmp.path().join("dyn").join(MANIFEST_NAME),
        Manifest::Dynamic.to_bytes(),
    )
    .unwrap();
    let fs = mount_over(&tmp);
    let req = fs.request();

    let dynamic = resolve(&fs, "/dyn").unwrap().unwrap();
    let stream = fs.opendir(&req, dynamic).unwrap();
    assert!(stream.readdir(2).is_empty());

    // Without a helper the miss is just a miss.
    assert_eq!(fs.lookup(&req, dynamic, OsStr::new("made")).unwrap(), None);

    // With a helper bound, the miss kicks off a fetch but still reports
    // negative; readdir never shows the in-flight name.
    let helper = fs.open_helper().unwrap();
    assert_eq!(fs.lookup(&req, dynamic, OsStr::new("made")).unwrap(), None);
    assert!(fs.opendir(&req, dynamic).unwrap().readdir(2).is_empty());

    let mut buf = [0u8; 64];
    let n = helper.read_request(&fs.request(), &mut buf).unwrap();
    let message = std::str::from_utf8(&buf[..n - 1]).unwrap();
    let id: u64 = message.split_whitespace().next().unwrap().parse().unwrap();
    assert_eq!(
        helper.request(id).unwrap().path(),
        OsStr::new("/dyn/made")
    );
    fs::write(tmp.path().join("dyn/made"), b"authored on demand").unwrap();
    helper.close_request(id);

    // The helper materialised the entry; lookup now consults the host.
    let made = fs.lookup(&req, dynamic, OsStr::new("made")).unwrap().unwrap();
    assert_eq!(read_all(&fs, made), b"authored on demand");
}

#[test]
fn root_readdir_lists_helper_control() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("README"), b"x").unwrap();
    write_manifest(tmp.path(), &[(EntryKind::Regular, "README")]);
    let fs = mount_over(&tmp);
    let req = fs.request();

    let stream = fs.opendir(&req, fs.root()).unwrap();
    let names: Vec<_> = stream.readdir(0).iter().map(|e| e.name.clone()).collect();
    assert_eq!(names[0], ".");
    assert_eq!(names[1], "..");
    assert!(names.contains(&"helper-control".into()));
    assert!(names.contains(&"README".into()));

    let control = fs
        .lookup(&req, fs.root(), OsStr::new("helper-control"))
        .unwrap()
        .unwrap();
    let attr = fs.getattr(control).unwrap();
    assert_eq!(attr.perm, 0o600);
    assert_eq!(attr.kind, FileKind::Regular);
}

#[test]
fn short_helper_read_buffer_consumes_nothing() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(tmp.path(), &[(EntryKind::Regular, "wanted")]);
    let fs = Arc::new(mount_over(&tmp));
    let helper = fs.open_helper().unwrap();

    let user = {
        let fs = fs.clone();
        thread::spawn(move || {
            let ino = resolve(&fs, "/wanted")?.ok_or(Error::NoHelper)?;
            fs.open(&fs.request(), ino, OpenFlags::read_only()).map(drop)
        })
    };
    thread::sleep(Duration::from_millis(100));

    let mut small = [0u8; 10];
    assert!(matches!(
        helper.read_request(&fs.request(), &mut small),
        Err(Error::InvalidArgument)
    ));

    // The request is still queued and readable with a proper buffer.
    let mut buf = [0u8; 64];
    let n = helper.read_request(&fs.request(), &mut buf).unwrap();
    let message = std::str::from_utf8(&buf[..n - 1]).unwrap();
    let id: u64 = message.split_whitespace().next().unwrap().parse().unwrap();
    assert_eq!(helper.request(id).unwrap().path(), OsStr::new("/wanted"));

    // Acknowledge without materialising: the producer retries once and
    // reports an I/O error.
    helper.close_request(id);
    let err = user.join().unwrap().unwrap_err();
    assert_eq!(err.errno(), Errno::EIO);
}

#[test]
fn interrupt_leaves_the_request_for_the_helper() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(tmp.path(), &[(EntryKind::Regular, "slow")]);
    let fs = Arc::new(mount_over(&tmp));
    let helper = fs.open_helper().unwrap();

    let req = fs.request();
    let interrupt = req.interrupt();
    let user = {
        let fs = fs.clone();
        thread::spawn(move || {
            let ino = fs.lookup(&req, fs.root(), OsStr::new("slow"))?.unwrap();
            fs.open(&req, ino, OpenFlags::read_only()).map(drop)
        })
    };
    thread::sleep(Duration::from_millis(100));
    interrupt.raise();
    assert!(matches!(user.join().unwrap(), Err(Error::Interrupted)));

    // The interrupted producer did not dequeue its request.
    let mut buf = [0u8; 64];
    let n = helper.read_request(&fs.request(), &mut buf).unwrap();
    let message = std::str::from_utf8(&buf[..n - 1]).unwrap();
    let id: u64 = message.split_whitespace().next().unwrap().parse().unwrap();
    assert_eq!(helper.request(id).unwrap().path(), OsStr::new("/slow"));
    helper.close_request(id);
}

#[test]
fn second_helper_is_refused() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(tmp.path(), &[]);
    let fs = mount_over(&tmp);

    let helper = fs.open_helper().unwrap();
    let err = fs.open_helper().unwrap_err();
    assert!(matches!(err, Error::Busy));
    assert_eq!(err.errno(), Errno::EBUSY);
    drop(helper);
    fs.open_helper().unwrap();
}

#[test]
fn writes_are_refused() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("ro"), b"x").unwrap();
    write_manifest(tmp.path(), &[(EntryKind::Regular, "ro")]);
    let fs = mount_over(&tmp);

    let ro = resolve(&fs, "/ro").unwrap().unwrap();
    let err = fs
        .open(&fs.request(), ro, OpenFlags(libc::O_WRONLY))
        .unwrap_err();
    assert!(matches!(err, Error::NotSupported));
    assert_eq!(err.errno(), Errno::EROFS);
}

#[test]
fn mount_version_is_checked() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(tmp.path(), &[]);
    let mut params = MountParams::from_path(tmp.path()).unwrap();
    params.version = 2;
    assert!(matches!(mount(params), Err(Error::InvalidArgument)));
}

struct CountingDir {
    inner: Arc<dyn HostDir>,
    listing_opens: Arc<AtomicUsize>,
}

impl HostDir for CountingDir {
    fn lookup(&self, name: &OsStr) -> io::Result<Option<Box<dyn HostNode>>> {
        Ok(self.inner.lookup(name)?.map(|node| {
            Box::new(CountingNode {
                inner: node,
                is_listing: name == OsStr::new(MANIFEST_NAME),
                listing_opens: self.listing_opens.clone(),
            }) as Box<dyn HostNode>
        }))
    }
}

struct CountingNode {
    inner: Box<dyn HostNode>,
    is_listing: bool,
    listing_opens: Arc<AtomicUsize>,
}

impl HostNode for CountingNode {
    fn ident(&self) -> HostIdent {
        self.inner.ident()
    }

    fn kind(&self) -> FileKind {
        self.inner.kind()
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn open_dir(&self) -> io::Result<Arc<dyn HostDir>> {
        Ok(Arc::new(CountingDir {
            inner: self.inner.open_dir()?,
            listing_opens: self.listing_opens.clone(),
        }))
    }

    fn open_file(&self, flags: OpenFlags) -> io::Result<Box<dyn HostFile>> {
        if self.is_listing {
            self.listing_opens.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.open_file(flags)
    }
}

#[test]
fn unchanged_listing_is_read_once() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("a"), b"x").unwrap();
    write_manifest(tmp.path(), &[(EntryKind::Regular, "a")]);

    let opens = Arc::new(AtomicUsize::new(0));
    let host = Arc::new(CountingDir {
        inner: Arc::new(lazyfs::DiskDir::open(tmp.path()).unwrap()),
        listing_opens: opens.clone(),
    });
    let fs = mount(MountParams::new(host)).unwrap();
    let req = fs.request();

    fs.opendir(&req, fs.root()).unwrap();
    fs.opendir(&req, fs.root()).unwrap();
    assert_eq!(opens.load(Ordering::SeqCst), 1);

    // An atomically replaced listing has a new identity and is re-read.
    replace_manifest(tmp.path(), &[(EntryKind::Regular, "a")]);
    fs.opendir(&req, fs.root()).unwrap();
    assert_eq!(opens.load(Ordering::SeqCst), 2);
}

#[test]
fn host_kind_must_match_the_listing() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("tool"), b"#!/bin/sh\n").unwrap();
    fs::set_permissions(tmp.path().join("tool"), fs::Permissions::from_mode(0o755)).unwrap();
    // The listing declares a plain file, but the host grew an executable.
    write_manifest(tmp.path(), &[(EntryKind::Regular, "tool")]);
    let fs = mount_over(&tmp);

    let tool = resolve(&fs, "/tool").unwrap().unwrap();
    let err = fs
        .open(&fs.request(), tool, OpenFlags::read_only())
        .unwrap_err();
    assert!(matches!(err, Error::KindMismatch));
    assert_eq!(err.errno(), Errno::EIO);
}

#[test]
fn symlinks_surface_but_do_not_open() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    std::os::unix::fs::symlink("target", tmp.path().join("link")).unwrap();
    write_manifest(tmp.path(), &[(EntryKind::Symlink, "link")]);
    let fs = mount_over(&tmp);

    let link = resolve(&fs, "/link").unwrap().unwrap();
    assert_eq!(fs.getattr(link).unwrap().kind, FileKind::Symlink);
    assert!(matches!(
        fs.open(&fs.request(), link, OpenFlags::read_only()),
        Err(Error::NotSupported)
    ));
}
