use imgfs::fs::Filesystem;
use imgfs::shell::parse_size;

fn usage() -> ! {
    eprintln!("mkfs.imgfs image size");
    std::process::exit(1);
}

fn main() {
    env_logger::init();

    let mut image_path = None;
    let mut size = None;
    let args = std::env::args().skip(1);
    for arg in args {
        if image_path.is_none() {
            image_path = Some(arg);
        } else if size.is_none() {
            size = Some(arg);
        } else {
            eprintln!("mkfs.imgfs: too many arguments");
            usage();
        }
    }

    let (image_path, size) = match (image_path, size) {
        (Some(path), Some(size)) => (path, size),
        _ => {
            eprintln!("mkfs.imgfs: image path and size required");
            usage();
        }
    };

    let bytes = match parse_size(&size).map(u32::try_from) {
        Ok(Ok(bytes)) => bytes,
        _ => {
            eprintln!("mkfs.imgfs: invalid size {size}");
            std::process::exit(1);
        }
    };

    let mut fs = match Filesystem::open(image_path.as_ref()) {
        Ok(fs) => fs,
        Err(e) => {
            eprintln!("mkfs.imgfs: failed to open image {image_path}: {e}");
            std::process::exit(1);
        }
    };

    match fs.format(bytes) {
        Ok(()) => {
            eprintln!(
                "mkfs.imgfs: created filesystem on {} with {} blocks and {} inodes",
                image_path,
                fs.superblock().block_count.get(),
                fs.superblock().inode_count.get()
            );
        }
        Err(e) => {
            eprintln!("mkfs.imgfs: failed to create filesystem on {image_path}: {e}");
            std::process::exit(1);
        }
    }
}
