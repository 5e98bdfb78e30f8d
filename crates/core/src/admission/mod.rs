pub mod frame_admission;
