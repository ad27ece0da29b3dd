// build.rs

fn main() {
    // --- Link against Xlib and the two extension libraries we call directly ---
    // The `x11` crate covers Xlib itself; MIT-SHM lives in libXext and XVideo in
    // libXv, neither of which the crate binds, so we link them here.
    // pkg-config is tried first; if any probe fails we fall back to plain
    // linker flags that work on the usual distribution layouts.

    let libraries = ["x11", "xext", "xv"];

    let mut pkg_config_success = true;

    for lib in &libraries {
        if pkg_config::probe_library(lib).is_err() {
            eprintln!(
                "pkg-config failed for library '{}'. Falling back to manual linking.",
                lib
            );
            pkg_config_success = false;
            break;
        }
    }

    if !pkg_config_success {
        println!("cargo:rustc-link-lib=X11");
        println!("cargo:rustc-link-lib=Xext"); // XShm*
        // Some systems ship only the runtime soname (no libXv.so dev symlink);
        // link the versioned file directly in that case.
        let xv_dev_present = ["/usr/lib/x86_64-linux-gnu/libXv.so", "/usr/lib/libXv.so"]
            .iter()
            .any(|p| std::path::Path::new(p).exists());
        let xv_runtime_present = ["/usr/lib/x86_64-linux-gnu/libXv.so.1", "/usr/lib/libXv.so.1"]
            .iter()
            .any(|p| std::path::Path::new(p).exists());
        if !xv_dev_present && xv_runtime_present {
            println!("cargo:rustc-link-lib=dylib:+verbatim=libXv.so.1"); // Xv*
        } else {
            println!("cargo:rustc-link-lib=Xv"); // Xv*
        }
        println!("cargo:rustc-link-search=/usr/lib");
        eprintln!(
            "Manual linking flags applied. Ensure X11, Xext and Xv development libraries are installed."
        );
    } else {
        eprintln!("pkg-config successfully found libraries. Linking configured automatically.");
    }
}
