//! Result output: the append-only output file plus stdout.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use tracing::{info, warn};

use versebatch_pool::OutputSink;
use versebatch_shared::{Result, VersebatchError};

/// Appends each emitted line to the output file and echoes it to stdout.
///
/// `emit` only queues the line; a dedicated writer thread does the file and
/// console I/O in emission order, flushing whenever the queue runs empty.
/// Call [`close`](Self::close) to wait for queued lines and see write errors.
pub struct OutputWriter {
    path: PathBuf,
    echo: Arc<AtomicBool>,
    sender: Mutex<Option<Sender<String>>>,
    writer: Mutex<Option<JoinHandle<io::Result<()>>>>,
}

impl OutputWriter {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| VersebatchError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| VersebatchError::io(path, e))?;

        let echo = Arc::new(AtomicBool::new(true));
        let (sender, receiver) = mpsc::channel();
        let writer = std::thread::Builder::new()
            .name("versebatch-output".into())
            .spawn({
                let echo = Arc::clone(&echo);
                move || write_lines(file, &receiver, &echo)
            })
            .map_err(|e| VersebatchError::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            echo,
            sender: Mutex::new(Some(sender)),
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Stop echoing to stdout.
    pub fn quiet(self) -> Self {
        self.echo.store(false, Ordering::Relaxed);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_line(&self, line: &str) -> Result<()> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let sent = sender
            .as_ref()
            .is_some_and(|s| s.send(line.to_string()).is_ok());
        if sent {
            Ok(())
        } else {
            Err(VersebatchError::io(
                &self.path,
                io::Error::new(io::ErrorKind::BrokenPipe, "output writer is closed"),
            ))
        }
    }

    /// Write out everything queued, stop the writer thread and report the
    /// first write error. Later calls do nothing.
    pub fn close(&self) -> Result<()> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let handle = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match handle.map(JoinHandle::join) {
            None | Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(e))) => Err(VersebatchError::io(&self.path, e)),
            Some(Err(_)) => Err(VersebatchError::Task("output writer panicked".into())),
        }
    }
}

fn write_lines(file: File, lines: &Receiver<String>, echo: &AtomicBool) -> io::Result<()> {
    let mut file = BufWriter::new(file);
    while let Ok(first) = lines.recv() {
        let mut next = Some(first);
        while let Some(line) = next {
            writeln!(file, "{line}")?;
            info!(target: "versebatch::output", "{line}");
            if echo.load(Ordering::Relaxed) {
                println!("{line}");
            }
            next = lines.try_recv().ok();
        }
        file.flush()?;
    }
    file.flush()
}

impl Drop for OutputWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "output writer failed");
        }
    }
}

impl OutputSink<String> for OutputWriter {
    fn emit(&self, value: String) -> Result<()> {
        self.write_line(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_lines() {
        let dir = std::env::temp_dir().join(format!("vb-output-test-{}", uuid::Uuid::now_v7()));
        let path = dir.join("nested").join("out.txt");

        let writer = OutputWriter::open(&path).unwrap().quiet();
        writer.emit("first".to_string()).unwrap();
        writer.emit("second".to_string()).unwrap();
        drop(writer);

        let again = OutputWriter::open(&path).unwrap().quiet();
        again.write_line("third").unwrap();
        again.close().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\nthird\n");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_emitters_keep_whole_lines_and_close_drains() {
        let dir = std::env::temp_dir().join(format!("vb-output-test-{}", uuid::Uuid::now_v7()));
        let path = dir.join("out.txt");
        let writer = Arc::new(OutputWriter::open(&path).unwrap().quiet());

        let mut tasks = Vec::new();
        for t in 0..4 {
            let writer = Arc::clone(&writer);
            tasks.push(tokio::spawn(async move {
                for i in 0..250 {
                    writer.emit(format!("task{t}-line{i}")).unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        writer.close().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1000);
        assert!(lines.iter().all(|l| l.starts_with("task") && l.contains("-line")));
        assert!(lines.contains(&"task3-line249"));

        assert!(writer.emit("late".to_string()).is_err());
        writer.close().unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }
}
