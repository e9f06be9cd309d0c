fn main() {
    // Kernels are embedded with include_str!
    println!("cargo:rerun-if-changed=shaders/");
    for shader in ["common", "parameterize", "clear", "render", "aggregate", "shift", "filter", "voxelize"] {
        println!("cargo:rerun-if-changed=shaders/{}.wgsl", shader);
    }
}
