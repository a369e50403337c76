//! Output sinks fed by the pipeline hub: the annotated MJPEG stream and the
//! label push socket.

pub mod overlay;
pub mod push;
pub mod stream;
