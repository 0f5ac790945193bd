//! In-memory class file and jar builders for tests.

use std::io::Write;
use std::path::Path;

use zip::write::SimpleFileOptions;

/// Minimal class file writer for tests.
pub(crate) struct ClassFileBuilder {
    cp: Vec<CpEntry>,
    access_flags: u16,
    this_class: u16,
    super_class: u16,
    fields: Vec<FieldSpec>,
    methods: Vec<MethodSpec>,
    nest_host: Option<u16>,
    nest_members: Vec<u16>,
    bootstrap_methods: Vec<u16>,
    code_index: u16,
}

/// Code attribute contents for a generated method.
pub(crate) struct MethodCode {
    code: Vec<u8>,
    max_stack: u16,
    max_locals: u16,
    line_numbers: bool,
}

impl MethodCode {
    pub(crate) fn new(code: Vec<u8>, max_stack: u16, max_locals: u16) -> Self {
        Self {
            code,
            max_stack,
            max_locals,
            line_numbers: false,
        }
    }

    /// Attach a one-row LineNumberTable pointing at offset 0.
    pub(crate) fn with_line_numbers(mut self) -> Self {
        self.line_numbers = true;
        self
    }
}

impl ClassFileBuilder {
    pub(crate) fn new(class_name: &str, super_name: &str) -> Self {
        let mut builder = Self {
            cp: Vec::new(),
            access_flags: 0x0021,
            this_class: 0,
            super_class: 0,
            fields: Vec::new(),
            methods: Vec::new(),
            nest_host: None,
            nest_members: Vec::new(),
            bootstrap_methods: Vec::new(),
            code_index: 0,
        };
        builder.code_index = builder.add_utf8("Code");
        builder.this_class = builder.add_class(class_name);
        builder.super_class = builder.add_class(super_name);
        builder
    }

    pub(crate) fn access_flags(&mut self, flags: u16) {
        self.access_flags = flags;
    }

    pub(crate) fn add_utf8(&mut self, value: &str) -> u16 {
        self.push(CpEntry::Utf8(value.to_string()))
    }

    pub(crate) fn add_class(&mut self, name: &str) -> u16 {
        let name_index = self.add_utf8(name);
        self.push(CpEntry::Class(name_index))
    }

    pub(crate) fn add_long(&mut self, value: u64) -> u16 {
        let index = self.push(CpEntry::Long(value));
        self.cp.push(CpEntry::Unusable);
        index
    }

    pub(crate) fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.push(CpEntry::NameAndType(name_index, descriptor_index))
    }

    pub(crate) fn add_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.push(CpEntry::MethodRef(class_index, name_and_type))
    }

    pub(crate) fn add_field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.push(CpEntry::FieldRef(class_index, name_and_type))
    }

    /// `REF_invokeStatic` handle to a static method.
    pub(crate) fn add_static_method_handle(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> u16 {
        let method_ref = self.add_method_ref(class, name, descriptor);
        self.push(CpEntry::MethodHandle(6, method_ref))
    }

    pub(crate) fn add_method_type(&mut self, descriptor: &str) -> u16 {
        let descriptor_index = self.add_utf8(descriptor);
        self.push(CpEntry::MethodType(descriptor_index))
    }

    /// Adds a lambda-metafactory bootstrap method and an InvokeDynamic entry using it.
    pub(crate) fn add_invoke_dynamic(&mut self, name: &str, descriptor: &str) -> u16 {
        let handle = self.add_static_method_handle(
            "java/lang/invoke/LambdaMetafactory",
            "metafactory",
            "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodHandle;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;",
        );
        let bootstrap_index = self.bootstrap_methods.len() as u16;
        self.bootstrap_methods.push(handle);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.push(CpEntry::InvokeDynamic(bootstrap_index, name_and_type))
    }

    pub(crate) fn add_field(&mut self, name: &str, descriptor: &str, access_flags: u16) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.fields.push(FieldSpec {
            access_flags,
            name_index,
            descriptor_index,
        });
    }

    pub(crate) fn add_method(
        &mut self,
        name: &str,
        descriptor: &str,
        access_flags: u16,
        code: Option<MethodCode>,
    ) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.methods.push(MethodSpec {
            access_flags,
            name_index,
            descriptor_index,
            code,
        });
    }

    pub(crate) fn nest_host(&mut self, host: &str) {
        self.nest_host = Some(self.add_class(host));
    }

    pub(crate) fn nest_member(&mut self, member: &str) {
        let index = self.add_class(member);
        self.nest_members.push(index);
    }

    pub(crate) fn finish(mut self) -> Vec<u8> {
        let line_numbers_index = self.add_utf8("LineNumberTable");
        let nest_host_name = self.nest_host.map(|_| self.add_utf8("NestHost"));
        let nest_members_name =
            (!self.nest_members.is_empty()).then(|| self.add_utf8("NestMembers"));
        let bootstrap_name =
            (!self.bootstrap_methods.is_empty()).then(|| self.add_utf8("BootstrapMethods"));

        let mut bytes = Vec::new();
        write_u32(&mut bytes, 0xCAFEBABE);
        write_u16(&mut bytes, 0);
        write_u16(&mut bytes, 61);
        write_u16(&mut bytes, (self.cp.len() + 1) as u16);
        for entry in &self.cp {
            entry.write(&mut bytes);
        }
        write_u16(&mut bytes, self.access_flags);
        write_u16(&mut bytes, self.this_class);
        write_u16(&mut bytes, self.super_class);
        write_u16(&mut bytes, 0);

        write_u16(&mut bytes, self.fields.len() as u16);
        for field in &self.fields {
            write_u16(&mut bytes, field.access_flags);
            write_u16(&mut bytes, field.name_index);
            write_u16(&mut bytes, field.descriptor_index);
            write_u16(&mut bytes, 0);
        }

        write_u16(&mut bytes, self.methods.len() as u16);
        for method in &self.methods {
            write_u16(&mut bytes, method.access_flags);
            write_u16(&mut bytes, method.name_index);
            write_u16(&mut bytes, method.descriptor_index);
            let Some(code) = &method.code else {
                write_u16(&mut bytes, 0);
                continue;
            };
            write_u16(&mut bytes, 1);
            write_u16(&mut bytes, self.code_index);
            let nested_len = if code.line_numbers { 6 + 6 } else { 0 };
            let attr_len = 12 + code.code.len() as u32 + nested_len;
            write_u32(&mut bytes, attr_len);
            write_u16(&mut bytes, code.max_stack);
            write_u16(&mut bytes, code.max_locals);
            write_u32(&mut bytes, code.code.len() as u32);
            bytes.extend_from_slice(&code.code);
            write_u16(&mut bytes, 0);
            if code.line_numbers {
                write_u16(&mut bytes, 1);
                write_u16(&mut bytes, line_numbers_index);
                write_u32(&mut bytes, 6);
                write_u16(&mut bytes, 1);
                write_u16(&mut bytes, 0);
                write_u16(&mut bytes, 42);
            } else {
                write_u16(&mut bytes, 0);
            }
        }

        let class_attribute_count = nest_host_name.is_some() as u16
            + nest_members_name.is_some() as u16
            + bootstrap_name.is_some() as u16;
        write_u16(&mut bytes, class_attribute_count);
        if let (Some(name), Some(host)) = (nest_host_name, self.nest_host) {
            write_u16(&mut bytes, name);
            write_u32(&mut bytes, 2);
            write_u16(&mut bytes, host);
        }
        if let Some(name) = nest_members_name {
            write_u16(&mut bytes, name);
            write_u32(&mut bytes, 2 + 2 * self.nest_members.len() as u32);
            write_u16(&mut bytes, self.nest_members.len() as u16);
            for member in &self.nest_members {
                write_u16(&mut bytes, *member);
            }
        }
        if let Some(name) = bootstrap_name {
            write_u16(&mut bytes, name);
            write_u32(&mut bytes, 2 + 4 * self.bootstrap_methods.len() as u32);
            write_u16(&mut bytes, self.bootstrap_methods.len() as u16);
            for handle in &self.bootstrap_methods {
                write_u16(&mut bytes, *handle);
                write_u16(&mut bytes, 0);
            }
        }
        bytes
    }

    fn push(&mut self, entry: CpEntry) -> u16 {
        self.cp.push(entry);
        self.cp.len() as u16
    }
}

struct FieldSpec {
    access_flags: u16,
    name_index: u16,
    descriptor_index: u16,
}

struct MethodSpec {
    access_flags: u16,
    name_index: u16,
    descriptor_index: u16,
    code: Option<MethodCode>,
}

/// Constant pool entries needed by test class files.
enum CpEntry {
    Unusable,
    Utf8(String),
    Long(u64),
    Class(u16),
    NameAndType(u16, u16),
    MethodRef(u16, u16),
    FieldRef(u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    InvokeDynamic(u16, u16),
}

impl CpEntry {
    fn write(&self, bytes: &mut Vec<u8>) {
        match self {
            CpEntry::Unusable => {}
            CpEntry::Utf8(value) => {
                bytes.push(1);
                write_u16(bytes, value.len() as u16);
                bytes.extend_from_slice(value.as_bytes());
            }
            CpEntry::Long(value) => {
                bytes.push(5);
                bytes.extend_from_slice(&value.to_be_bytes());
            }
            CpEntry::Class(name_index) => {
                bytes.push(7);
                write_u16(bytes, *name_index);
            }
            CpEntry::NameAndType(name_index, descriptor_index) => {
                bytes.push(12);
                write_u16(bytes, *name_index);
                write_u16(bytes, *descriptor_index);
            }
            CpEntry::MethodRef(class_index, name_and_type) => {
                bytes.push(10);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
            CpEntry::FieldRef(class_index, name_and_type) => {
                bytes.push(9);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
            CpEntry::MethodHandle(kind, reference) => {
                bytes.push(15);
                bytes.push(*kind);
                write_u16(bytes, *reference);
            }
            CpEntry::MethodType(descriptor_index) => {
                bytes.push(16);
                write_u16(bytes, *descriptor_index);
            }
            CpEntry::InvokeDynamic(bootstrap_index, name_and_type) => {
                bytes.push(18);
                write_u16(bytes, *bootstrap_index);
                write_u16(bytes, *name_and_type);
            }
        }
    }
}

fn write_u16(bytes: &mut Vec<u8>, value: u16) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

fn write_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn high(value: u16) -> u8 {
    (value >> 8) as u8
}

pub(crate) fn low(value: u16) -> u8 {
    (value & 0xff) as u8
}

/// `com/acme/Foo`: nest host of `Foo$Inner`, reads the inner class's private
/// field in `bar` and creates a lambda in `task`.
pub(crate) fn foo_class() -> Vec<u8> {
    let mut builder = ClassFileBuilder::new("com/acme/Foo", "java/lang/Object");
    builder.nest_member("com/acme/Foo$Inner");
    let object_init = builder.add_method_ref("java/lang/Object", "<init>", "()V");
    let secret = builder.add_field_ref("com/acme/Foo$Inner", "secret", "I");
    let run = builder.add_invoke_dynamic("run", "()Ljava/lang/Runnable;");
    let helper = builder.add_method_ref("com/acme/Foo", "helper", "()V");

    builder.add_field("count", "J", 0x0002);
    builder.add_method(
        "<init>",
        "()V",
        0x0001,
        Some(MethodCode::new(
            vec![0x2a, 0xb7, high(object_init), low(object_init), 0xb1],
            1,
            1,
        )),
    );
    builder.add_method(
        "bar",
        "(Lcom/acme/Foo$Inner;)I",
        0x0001,
        Some(MethodCode::new(
            vec![0x2b, 0xb4, high(secret), low(secret), 0xac],
            1,
            2,
        )),
    );
    builder.add_method(
        "task",
        "()Ljava/lang/Runnable;",
        0x0001,
        Some(
            MethodCode::new(
                vec![
                    0x2a,
                    0xb6,
                    high(helper),
                    low(helper),
                    0xba,
                    high(run),
                    low(run),
                    0x00,
                    0x00,
                    0xb0,
                ],
                1,
                1,
            )
            .with_line_numbers(),
        ),
    );
    builder.add_method(
        "helper",
        "()V",
        0x0002,
        Some(MethodCode::new(vec![0xb1], 0, 1)),
    );
    builder.finish()
}

/// `com/acme/Foo$Inner`: nest member with a private field and a lambda-creating
/// static method.
pub(crate) fn foo_inner_class() -> Vec<u8> {
    let mut builder = ClassFileBuilder::new("com/acme/Foo$Inner", "java/lang/Object");
    builder.nest_host("com/acme/Foo");
    let object_init = builder.add_method_ref("java/lang/Object", "<init>", "()V");
    let supplier = builder.add_invoke_dynamic("get", "()Ljava/util/function/Supplier;");

    builder.add_field("secret", "I", 0x0002);
    builder.add_method(
        "<init>",
        "()V",
        0x0002,
        Some(MethodCode::new(
            vec![0x2a, 0xb7, high(object_init), low(object_init), 0xb1],
            1,
            1,
        )),
    );
    builder.add_method(
        "supplier",
        "(JD)Ljava/util/function/Supplier;",
        0x0009,
        Some(MethodCode::new(
            vec![0xba, high(supplier), low(supplier), 0x00, 0x00, 0xb0],
            1,
            4,
        )),
    );
    builder.finish()
}

/// `com/acme/Base`: nest host with a private `helper()V` that `run` calls.
pub(crate) fn base_class() -> Vec<u8> {
    let mut builder = ClassFileBuilder::new("com/acme/Base", "java/lang/Object");
    builder.nest_member("com/acme/Base$Sub");
    let helper = builder.add_method_ref("com/acme/Base", "helper", "()V");
    builder.add_method(
        "run",
        "()V",
        0x0001,
        Some(MethodCode::new(
            vec![0x2a, 0xb6, high(helper), low(helper), 0xb1],
            1,
            1,
        )),
    );
    builder.add_method(
        "helper",
        "()V",
        0x0002,
        Some(MethodCode::new(vec![0xb1], 0, 1)),
    );
    builder.finish()
}

/// `com/acme/Base$Sub`: nested subclass of `Base` declaring its own private
/// `helper()V`, and calling both its own and the host's.
pub(crate) fn base_sub_class() -> Vec<u8> {
    let mut builder = ClassFileBuilder::new("com/acme/Base$Sub", "com/acme/Base");
    builder.nest_host("com/acme/Base");
    let own = builder.add_method_ref("com/acme/Base$Sub", "helper", "()V");
    let inherited = builder.add_method_ref("com/acme/Base", "helper", "()V");
    builder.add_method(
        "call",
        "()V",
        0x0001,
        Some(MethodCode::new(
            vec![
                0x2a,
                0xb6,
                high(own),
                low(own),
                0x2a,
                0xb6,
                high(inherited),
                low(inherited),
                0xb1,
            ],
            1,
            1,
        )),
    );
    builder.add_method(
        "helper",
        "()V",
        0x0002,
        Some(MethodCode::new(vec![0xb1], 0, 1)),
    );
    builder.finish()
}

/// Class outside any nest that uses a lambda.
pub(crate) fn plain_lambda_class(name: &str) -> Vec<u8> {
    let mut builder = ClassFileBuilder::new(name, "java/lang/Object");
    let run = builder.add_invoke_dynamic("run", "()Ljava/lang/Runnable;");
    builder.add_method(
        "task",
        "()Ljava/lang/Runnable;",
        0x0009,
        Some(MethodCode::new(
            vec![0xba, high(run), low(run), 0x00, 0x00, 0xb0],
            1,
            0,
        )),
    );
    builder.finish()
}

pub(crate) fn write_jar(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).expect("create jar");
    let mut writer = zip::ZipWriter::new(file);
    for (name, data) in entries {
        if name.ends_with('/') {
            writer
                .add_directory(name.to_string(), SimpleFileOptions::default())
                .expect("add directory");
            continue;
        }
        writer
            .start_file(name.to_string(), SimpleFileOptions::default())
            .expect("start entry");
        writer.write_all(data).expect("write entry");
    }
    writer.finish().expect("finish jar");
}

pub(crate) fn read_jar(path: &Path) -> Vec<(String, Vec<u8>)> {
    use std::io::Read;

    let file = std::fs::File::open(path).expect("open jar");
    let mut archive = zip::ZipArchive::new(file).expect("read jar");
    let mut entries = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).expect("entry");
        if entry.is_dir() {
            continue;
        }
        let mut data = Vec::new();
        entry.read_to_end(&mut data).expect("read entry");
        entries.push((entry.name().to_string(), data));
    }
    entries.sort();
    entries
}
