pub mod lockfile;
