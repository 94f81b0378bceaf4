/// Built-in OUI (Organizationally Unique Identifier) database
/// This serves as a fallback when the external manuf.txt file is not available
pub const BUILTIN_OUI: &str = r#"
00:00:5E   IANA
00:17:F2   Apple, Inc.
00:1B:63   Apple, Inc.
00:1C:B3   Apple, Inc.
00:26:08   Apple, Inc.
00:26:BB   Apple, Inc.
00:1A:11   Google, Inc.
00:1A:8A   Samsung Electronics Co.,Ltd
D8:27:27   Samsung Electronics Co.,Ltd
B8:27:EB   Raspberry Pi Foundation
DC:A6:32   Raspberry Pi Trading Ltd
00:0F:FE   Intel Corporate
00:1B:21   Intel Corporate
00:01:E6   Hewlett Packard
00:1E:0B   Hewlett Packard
00:18:8B   Microsoft Corporation
00:22:48   Microsoft Corporation
00:0D:3A   Microsoft Corporation
00:15:5D   Microsoft Corporation
00:0C:29   VMware, Inc.
00:50:56   VMware, Inc.
08:00:27   PCS Systemtechnik GmbH
52:54:00   QEMU virtual NIC
00:1C:42   Parallels, Inc.
00:00:0C   Cisco Systems, Inc
00:01:42   Cisco Systems, Inc
00:01:96   Cisco Systems, Inc
FC:EC:DA   Ubiquiti Inc
50:C7:BF   TP-LINK TECHNOLOGIES CO.,LTD.
44:65:0D   Amazon Technologies Inc.
"#;
