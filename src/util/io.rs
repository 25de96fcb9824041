use crate::error::{deserialize_error, serialize_error, GBError};
use crate::util::timer::GbTimer;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub fn get_buf_reader(file_path: &Path) -> Result<BufReader<File>, GBError> {
    Ok(BufReader::new(File::open(file_path).map_err(|e| {
        GBError::ReadFile(file_path.display().to_string(), e.to_string())
    })?))
}

pub fn get_file_lines(file_path: &Path) -> Result<impl Iterator<Item = String>, GBError> {
    Ok(get_buf_reader(file_path)?.lines().filter_map(Result::ok))
}

pub fn create_dir_all(dir: &Path) -> Result<(), GBError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| GBError::CreateFile(dir.display().to_string(), e.to_string()))
}

pub struct GbWriter {
    buf_writer: BufWriter<File>,
    file_path: String,
}

impl GbWriter {
    pub fn new(file_path: &Path) -> Result<Self, GBError> {
        let file_path = file_path.display().to_string();
        let buf_writer = BufWriter::new(
            File::create(&file_path)
                .map_err(|e| GBError::CreateFile(file_path.clone(), e.to_string()))?,
        );
        Ok(Self { buf_writer, file_path })
    }

    #[inline]
    pub fn write_file_lines(
        &mut self,
        lines: impl Iterator<Item = String>,
    ) -> Result<(), GBError> {
        for line in lines {
            self.write_file_line(&line)?;
        }
        Ok(())
    }

    #[inline]
    pub fn write_file_line(&mut self, line: &str) -> Result<(), GBError> {
        self.buf_writer
            .write_all([line, "\n"].concat().as_bytes())
            .map_err(|e| GBError::WriteFile(self.file_path.clone(), e.to_string()))
    }

    pub fn flush(&mut self) -> Result<(), GBError> {
        self.buf_writer
            .flush()
            .map_err(|e| GBError::WriteFile(self.file_path.clone(), e.to_string()))
    }

    pub fn buf_writer(&mut self) -> &mut BufWriter<File> {
        &mut self.buf_writer
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }
}

/// Writes `object` with bincode to `file_path`.
pub fn serialize_object<T: Serialize>(file_path: &Path, object: &T) -> Result<(), GBError> {
    let name = file_path.display().to_string();
    let timer = GbTimer::now();
    let mut writer = GbWriter::new(file_path)?;
    bincode::serialize_into(writer.buf_writer(), object).map_err(|e| serialize_error(&name, e))?;
    writer.flush()?;
    debug!("Serialized '{}' in {}", name, timer.elapsed().to_millis_string());
    Ok(())
}

/// Reads back an object written by `serialize_object`.
pub fn deserialize_object<T: DeserializeOwned>(file_path: &Path) -> Result<T, GBError> {
    let name = file_path.display().to_string();
    let timer = GbTimer::now();
    let reader = get_buf_reader(file_path)?;
    let object = bincode::deserialize_from(reader).map_err(|e| deserialize_error(&name, e))?;
    debug!("Deserialized '{}' in {}", name, timer.elapsed().to_millis_string());
    Ok(object)
}
