use pagefs::{FileSystem, OpenFlag, Process, Whence};

pub fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut fs = FileSystem::builder().with_preallocated_pages(16).build();
    let mut proc = Process::new(&fs);

    let fd = proc.open(&mut fs, "file", OpenFlag::CREATE)?;
    proc.write(&mut fs, fd, b"Hello, world!\0")?;
    proc.seek(&fs, fd, 0, Whence::Set)?;

    let mut buf = [0; 14];
    let n = proc.read(&mut fs, fd, &mut buf)?;
    println!("read {} bytes: {:?}", n, String::from_utf8_lossy(&buf[..n]));

    proc.link(&mut fs, "file", "alias")?;
    for (name, kind) in proc.list(&fs) {
        println!("{:>8} {:?}", name, kind);
    }

    proc.unlink(&mut fs, "file")?;
    let stat = proc.fstat(&fs, fd)?;
    println!(
        "after unlink: size={} links={} opens={}",
        stat.size, stat.links, stat.opens
    );

    proc.unlink(&mut fs, "alias")?;
    proc.exit(&mut fs);
    println!("live inodes: {}, pages in use: {}", fs.inode_count(), fs.pages_in_use());
    fs.unmount()?;
    Ok(())
}
